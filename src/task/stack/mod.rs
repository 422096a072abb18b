mod build_stack;

pub(crate) use build_stack::BuildStack;
