use crate::engine::{restack, Engine};
use crate::errors::Result;

/// Resume an interrupted operation after the user resolved conflicts.
pub fn run() -> Result<()> {
    let mut engine = Engine::open()?;
    engine.begin_resume()?;
    restack::continue_op(&mut engine)
}
