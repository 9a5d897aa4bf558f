use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Profiles;

#[derive(Copy, Clone, Debug)]
pub enum Phase { List, Show }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::List => "list", Phase::Show => "show" } }
    fn span(&self) -> Span { match self { Phase::List => info_span!("list"), Phase::Show => info_span!("show") } }
}

impl OpMarker for Profiles {
    const NAME: &'static str = "profiles";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("profiles") }
}
