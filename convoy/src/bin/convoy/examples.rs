use crate::commands::{init, migrate, new};

#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

/// Examples appended to a subcommand's long help
#[derive(Clone, Copy)]
pub struct CommandExample {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub const COMMAND_EXAMPLES: &[CommandExample] = &[
    CommandExample {
        name: "init",
        groups: init::EXAMPLES,
    },
    CommandExample {
        name: "new",
        groups: new::EXAMPLES,
    },
    CommandExample {
        name: "migrate",
        groups: migrate::EXAMPLES,
    },
];
