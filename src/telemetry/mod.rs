pub mod config;
pub mod ctx;
pub mod emit;
pub mod ops;

use ctx::LogCtx;

// Factory helpers, one typed context per command
pub fn run() -> LogCtx<ops::run::Run> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn profiles() -> LogCtx<ops::profiles::Profiles> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn inspect() -> LogCtx<ops::inspect::Inspect> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
