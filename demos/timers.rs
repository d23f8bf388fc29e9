use std::time::Duration;

use spindle::prelude::*;

fn main() -> Result<(), TimerError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let engine = TimerEngine::start()?;

    let (soon, soon_done) = WorkItem::waitable();
    let (later, later_done) = WorkItem::waitable();
    let (never, never_done) = WorkItem::waitable();

    engine.delay_secs(0.2, later);
    engine.delay_secs(0.05, soon);
    let token = engine.delay(Duration::from_secs(10), never);

    println!("soon:  {:?}", soon_done.wait());
    println!("later: {:?}", later_done.wait());

    if let Some(token) = token {
        engine.cancel(token);
    }
    println!("never: {:?}", never_done.wait());

    engine.stop();
    Ok(())
}
