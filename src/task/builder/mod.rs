mod family_builder;
mod task_builder;

pub(crate) use family_builder::FamilyBuilder;
pub(crate) use task_builder::TaskBuilder;
