#[derive(Clone, Debug)]
pub struct FamilyBuilder {
    pub(crate) base: String,
    description: Option<String>,
}

impl FamilyBuilder {
    pub fn new(base: String) -> Self {
        Self {
            base,
            description: None,
        }
    }

    pub fn set_description(&mut self, desc: &str) {
        self.description = Some(desc.to_string());
    }

    pub fn build(self) -> (String, Option<String>) {
        (self.base, self.description)
    }
}
