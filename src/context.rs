//! Execution context for the stackit CLI.
//!
//! Carries the global `--verbose` and `--dry-run` flags without threading them
//! through every signature. Async code paths read a tokio task-local (survives
//! task migration across worker threads); synchronous code falls back to a
//! thread-local.

use std::cell::RefCell;
use std::future::Future;

thread_local! {
    static SYNC_CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

tokio::task_local! {
    static ASYNC_CONTEXT: ExecutionContext;
}

/// Global execution context for the current CLI invocation.
#[derive(Clone, Copy, Default)]
pub struct ExecutionContext {
    /// Show git commands being executed
    pub verbose: bool,
    /// Preview mutating operations without executing them
    pub dry_run: bool,
}

impl ExecutionContext {
    pub fn new(verbose: bool, dry_run: bool) -> Self {
        Self { verbose, dry_run }
    }

    /// Initialize the thread-local context (for synchronous code paths).
    pub fn init(verbose: bool, dry_run: bool) {
        SYNC_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = ExecutionContext { verbose, dry_run };
        });
    }

    /// Whether verbose mode is enabled for the current invocation.
    pub fn is_verbose() -> bool {
        if let Ok(verbose) = ASYNC_CONTEXT.try_with(|ctx| ctx.verbose) {
            return verbose;
        }
        SYNC_CONTEXT.with(|ctx| ctx.borrow().verbose)
    }

    /// Whether dry-run mode is enabled for the current invocation.
    pub fn is_dry_run() -> bool {
        if let Ok(dry_run) = ASYNC_CONTEXT.try_with(|ctx| ctx.dry_run) {
            return dry_run;
        }
        SYNC_CONTEXT.with(|ctx| ctx.borrow().dry_run)
    }
}

/// Run an async function with the given execution context scoped around it.
pub async fn with_context<F, T>(ctx: ExecutionContext, f: F) -> T
where
    F: Future<Output = T>,
{
    ASYNC_CONTEXT.scope(ctx, f).await
}
