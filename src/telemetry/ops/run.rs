use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Run;

#[derive(Copy, Clone, Debug)]
pub enum Phase { LoadInput, Plan, Batch, Fetch, Extract, Checkpoint }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::LoadInput => "load_input",
        Phase::Plan => "plan",
        Phase::Batch => "batch",
        Phase::Fetch => "fetch",
        Phase::Extract => "extract",
        Phase::Checkpoint => "checkpoint",
    }}
    fn span(&self) -> Span { match self {
        Phase::LoadInput => info_span!("load_input"),
        Phase::Plan => info_span!("plan"),
        Phase::Batch => info_span!("batch"),
        Phase::Fetch => info_span!("fetch"),
        Phase::Extract => info_span!("extract"),
        Phase::Checkpoint => info_span!("checkpoint"),
    }}
}

impl OpMarker for Run {
    const NAME: &'static str = "run";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("run") }
}
