use core::future::poll_fn;
use embassy_futures::select::{Either, select};
use embassy_time::Timer;

use super::DynamicTimer;

/// Connector background task runner.
///
/// Run for timeouts to fire. Sleeps until the armed deadline and feeds `Input::Timeout`.
pub struct Runner<'a> {
    timer: &'a (dyn DynamicTimer + Sync),
}

impl<'a> Runner<'a> {
    pub(crate) fn new(timer: &'a (dyn DynamicTimer + Sync)) -> Self {
        Self { timer }
    }

    pub async fn run(&mut self) {
        let mut seen = None;
        loop {
            let (generation, deadline) = poll_fn(|cx| self.timer.poll_timer(cx, seen)).await;
            seen = Some(generation);
            let Some(deadline) = deadline else {
                continue;
            };

            match select(
                Timer::at(deadline),
                poll_fn(|cx| self.timer.poll_timer(cx, Some(generation))),
            )
            .await
            {
                Either::First(()) => self.timer.expire(generation),
                // Re-armed or cancelled, the next round picks up the new deadline
                Either::Second(_) => seen = None,
            }
        }
    }
}
