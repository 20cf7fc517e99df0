use crate::engine::{restack, Engine};
use crate::errors::Result;

/// Cancel an interrupted operation.
pub fn run() -> Result<()> {
    let mut engine = Engine::open()?;
    engine.begin_resume()?;
    restack::abort_op(&mut engine)
}
