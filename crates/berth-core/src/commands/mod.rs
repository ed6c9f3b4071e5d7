//! Command definitions, the built-in command set and everything needed to
//! run one: dispatch over services, log aggregation and result envelopes.

pub mod builtin;
pub mod definition;
pub mod dispatch;
pub mod logs;
pub mod results;

pub use builtin::{
    CommandCatalog, ExecOptions, LifecycleOptions, LogsOptions, RestoreOptions,
};
pub use definition::{
    AnyCommand, ArgDef, ArgKind, ArgSpec, CommandBuilder, CommandContext, CommandDefinition,
    CommandHandler, CommandInfo, CommandOptions, CommonOptions, OutputFormat, Schema,
};
pub use dispatch::{DispatchPolicy, dispatch_services};
pub use logs::{LogAggregate, aggregate_logs, filter_and_sort};
pub use results::{
    CommandResult, CommandResults, ExecutionContext, ResultAggregator, ResultSummary,
};
