use async_trait::async_trait;

use crate::errors::ImagingResult;

/// One step of a host workflow.
///
/// Tasks receive a clone of the shared context; state they produce for later
/// stages goes through interior mutability on that context.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> ImagingResult<()>;

    /// Stable task name used in logs and metrics.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
