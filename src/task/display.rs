use super::model::{leaf_name, RegistryEntry};
use super::registry::TaskRegistry;
use crate::logger::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListRenderMode {
    Tree,
    Flat,
}

#[derive(Debug, Default, Clone)]
pub struct ListOutput {
    pub items: Vec<ListItem>,
    pub messages: Vec<ListMessage>,
}

impl ListOutput {
    fn push_message(&mut self, level: ListMessageLevel, text: impl Into<String>) {
        self.messages.push(ListMessage {
            level,
            text: text.into(),
        });
    }

    fn push_item(&mut self, item: ListItem) {
        self.items.push(item);
    }
}

#[derive(Debug, Clone)]
pub struct ListItem {
    pub kind: ListItemKind,
    pub depth: usize,
    /// Short name as shown in the tree.
    pub name: String,
    /// Name accepted on the command line.
    pub full_name: String,
    pub description: Option<String>,
}

impl ListItem {
    fn new(
        kind: ListItemKind,
        depth: usize,
        full_name: &str,
        description: Option<String>,
    ) -> Self {
        Self {
            kind,
            depth,
            name: leaf_name(full_name).to_string(),
            full_name: full_name.to_string(),
            description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListItemKind {
    Family,
    Task,
    Purge,
}

#[derive(Debug, Clone)]
pub struct ListMessage {
    pub level: ListMessageLevel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMessageLevel {
    Info,
    Warn,
}

impl TaskRegistry {
    pub fn list(&self, family: Option<&str>, mode: ListRenderMode) {
        let output = self.collect_list_output(family);
        crate::printer::print_list(&output, mode);
    }

    pub fn collect_list_output(&self, family: Option<&str>) -> ListOutput {
        let mut output = ListOutput::default();

        if let Some(base) = family {
            let base = base.trim();
            trace!("list request for family '{}'", base);
            if self.family(base).is_some() {
                self.collect_family(base, 0, &mut output);
            } else {
                output.push_message(
                    ListMessageLevel::Warn,
                    format!("Family '{}' does not exist.", base),
                );
            }
            return output;
        }

        if self.root_entries().is_empty() {
            output.push_message(ListMessageLevel::Info, "No tasks are defined.");
            return output;
        }

        for entry in self.root_entries() {
            self.collect_entry(entry, &mut output);
        }
        output
    }

    fn collect_entry(&self, entry: &RegistryEntry, output: &mut ListOutput) {
        match entry {
            RegistryEntry::Task(name) => {
                let description = self.lookup(name).and_then(|task| task.description.clone());
                output.push_item(ListItem::new(ListItemKind::Task, 0, name, description));
            }
            RegistryEntry::Family(base) => self.collect_family(base, 0, output),
            RegistryEntry::Purge(name) => {
                let description = self.purge(name).and_then(|purge| purge.description.clone());
                output.push_item(ListItem::new(ListItemKind::Purge, 0, name, description));
            }
        }
    }

    fn collect_family(&self, base: &str, depth: usize, output: &mut ListOutput) {
        let Some(family) = self.family(base) else {
            return;
        };
        output.push_item(ListItem::new(
            ListItemKind::Family,
            depth,
            base,
            family.description.clone(),
        ));
        for member in &family.members {
            let description = self.lookup(member).and_then(|task| task.description.clone());
            output.push_item(ListItem::new(
                ListItemKind::Task,
                depth + 1,
                member,
                description,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::{Purge, Task};

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register(Task::new("public_key").description("Generate public key."))
            .expect("task");
        registry
            .register_family(
                "sig_fw_images",
                Some("Create signed firmware images".into()),
                vec![Task::new("lwm2m"), Task::new("mqtt")],
            )
            .expect("family");
        registry
            .register_purge(Purge {
                name: "purge".into(),
                description: Some("Remove outputs".into()),
                dirs: Vec::new(),
            })
            .expect("purge");
        registry
    }

    #[test]
    fn tree_lists_families_with_members() {
        let output = registry().collect_list_output(None);
        let rows: Vec<(ListItemKind, usize, &str)> = output
            .items
            .iter()
            .map(|item| (item.kind, item.depth, item.name.as_str()))
            .collect();
        assert_eq!(
            rows,
            [
                (ListItemKind::Task, 0, "public_key"),
                (ListItemKind::Family, 0, "sig_fw_images"),
                (ListItemKind::Task, 1, "lwm2m"),
                (ListItemKind::Task, 1, "mqtt"),
                (ListItemKind::Purge, 0, "purge"),
            ]
        );
        assert_eq!(output.items[2].full_name, "sig_fw_images:lwm2m");
    }

    #[test]
    fn family_filter_limits_output() {
        let output = registry().collect_list_output(Some("sig_fw_images"));
        assert_eq!(output.items.len(), 3);
        assert!(output.messages.is_empty());
    }

    #[test]
    fn unknown_family_produces_warning() {
        let output = registry().collect_list_output(Some("nope"));
        assert!(output.items.is_empty());
        assert_eq!(output.messages[0].level, ListMessageLevel::Warn);
    }

    #[test]
    fn empty_registry_says_so() {
        let output = TaskRegistry::new().collect_list_output(None);
        assert_eq!(output.messages[0].level, ListMessageLevel::Info);
    }
}
