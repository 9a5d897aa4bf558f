use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Inspect;

#[derive(Copy, Clone, Debug)]
pub enum Phase { ReadHtml, Extract }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::ReadHtml => "read_html", Phase::Extract => "extract" } }
    fn span(&self) -> Span { match self { Phase::ReadHtml => info_span!("read_html"), Phase::Extract => info_span!("extract") } }
}

impl OpMarker for Inspect {
    const NAME: &'static str = "inspect";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("inspect") }
}
