pub mod fixture;
pub mod heal;
pub mod nodes;
pub mod pipeline;
pub mod report;
pub mod sink;
pub mod validator;

pub use fixture::{list_fixtures, parse_steps, read_steps, test_name_from_path};
pub use heal::{HealOutcome, SelfHealer, TestRun, TestRunner};
pub use pipeline::{
    CapturedImage, ExecutionResult, Node, NodeResult, NodeServices, RecordedAction,
    WorkflowContext, WorkflowEngine,
};
pub use report::{parse_test_results, TestFailure, TestSummary};
pub use sink::FsArtifactSink;
pub use validator::PlaywrightValidator;
