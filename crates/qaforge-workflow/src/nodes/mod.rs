mod generator;
mod loader;
mod step_runner;

pub(crate) use generator::ask_for_code;
pub use generator::{pom_class_name, strip_code_fences, PomGenerator, SpecGenerator};
pub use loader::FixtureLoader;
pub use step_runner::{is_recordable, StepRunner, DEFAULT_AGENT_PROMPT, RECORDABLE_ACTIONS};
