use std::future::Future;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub enum Transition<S, R> {
    Next(S, R),
    Stay(R),
    Done(R),
}

pub trait StateMachine<Ctx, RespCtx>: Sized {
    type StepResult<'a>: Future<Output = RespCtx> + Send + 'a
    where
        Self: 'a,
        RespCtx: 'a,
        Ctx: 'a;

    fn step<'a>(&'a mut self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

/// Drives one context's state machine to completion, reacting to external
/// cancellation (e.g. the daemon shutting down mid-exchange).
pub trait StateMachineCtx<Ctx, Res> {
    fn execute(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Res>> + Send;
}
