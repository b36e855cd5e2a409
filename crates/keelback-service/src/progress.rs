// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Non-blocking progress reporting.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::{sync::mpsc, task::JoinHandle};

/// Room for ticks to pile up while the terminal is being redrawn.
const TICK_CHANNEL_CAPACITY: usize = 1024;

/// A multi-producer progress counter.
///
/// Ticks never block the pipeline: when the channel is full the tick is
/// dropped, which only makes the bar lag behind.
#[derive(Debug, Clone)]
pub struct ProgressTick(Option<mpsc::Sender<()>>);

impl ProgressTick {
    /// A sink that discards all ticks.
    pub fn disabled() -> Self {
        Self(None)
    }

    /// Records one unit of progress.
    pub fn tick(&self) {
        if let Some(sender) = &self.0 {
            let _ = sender.try_send(());
        }
    }
}

/// Starts a progress bar of `length` units driven by the returned ticker.
///
/// The bar finishes once every [`ProgressTick`] clone has been dropped;
/// await the returned handle to ensure the final state is drawn.
pub fn start_progress(message: &str, length: u64) -> (ProgressTick, JoinHandle<()>) {
    let bar = styled_progress_bar(length);
    bar.set_message(message.to_owned());
    let (sender, mut receiver) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        while receiver.recv().await.is_some() {
            bar.inc(1);
        }
        bar.finish();
    });
    (ProgressTick(Some(sender)), handle)
}

fn styled_progress_bar(length: u64) -> ProgressBar {
    let bar = ProgressBar::new(length);
    bar.set_style(
        ProgressStyle::with_template(
            " {spinner:.green} {msg} [{elapsed_precise}] [{wide_bar}] {pos}/{len} ({eta})",
        )
        .expect("the template is valid")
        .progress_chars("#>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticks_drive_the_bar_until_all_senders_drop() {
        let (ticker, handle) = start_progress("test", 3);
        let clone = ticker.clone();
        clone.tick();
        ticker.tick();
        drop(clone);
        drop(ticker);
        handle.await.expect("progress task completes");
    }

    #[test]
    fn disabled_ticker_ignores_ticks() {
        ProgressTick::disabled().tick();
    }
}
