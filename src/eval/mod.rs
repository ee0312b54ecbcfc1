mod app;

pub use app::{
    build_evaluators, column_mappings, main, run, run_app, run_with_config,
    run_with_lookup, RunOutcome,
};
