//! Per-player ordering for bridge work.
//!
//! Work queued for one player runs in arrival order; different players never
//! wait on each other, so one slow store call only delays its own player.

use herald_core::PlayerId;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;

/// Finished lanes are pruned once this many players have been seen.
const PRUNE_THRESHOLD: usize = 256;

#[derive(Debug, Default)]
pub struct PlayerLanes {
    tails: HashMap<PlayerId, JoinHandle<()>>,
}

impl PlayerLanes {
    /// Queues `work` behind everything already queued for `player`.
    pub fn dispatch<F>(&mut self, player: PlayerId, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.tails.remove(&player);
        let tail = tokio::spawn(async move {
            if let Some(previous) = previous {
                // A failed predecessor still releases the lane.
                let _ = previous.await;
            }
            work.await;
        });
        self.tails.insert(player, tail);

        if self.tails.len() > PRUNE_THRESHOLD {
            self.tails.retain(|_, tail| !tail.is_finished());
        }
    }

    /// Waits for everything queued so far.
    pub async fn settle(&mut self) {
        for (_, tail) in self.tails.drain() {
            let _ = tail.await;
        }
    }
}
