// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Background tasks: the auto-batch drainer and the metrics ticker.
//!
//! Both run until their governor's shutdown signal fires. Neither holds the
//! governor handle itself, only the shared core.

use crate::governor::GovernorCore;
use crate::{EmbeddingOptions, EmbeddingResult, GovernorError};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

/// One text waiting in the auto-batch queue.
pub(crate) struct QueuedText {
    pub(crate) text: String,
    pub(crate) reply: oneshot::Sender<Result<EmbeddingResult, GovernorError>>,
}

/// Drains the queue every `batch_timeout` in chunks of at most
/// `cuda.batch_size`. On shutdown every text still queued is answered with
/// [`GovernorError::ShuttingDown`]; the count is returned.
pub(crate) async fn run_batcher(
    core: Arc<GovernorCore>,
    mut queue: mpsc::Receiver<QueuedText>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = tokio::time::interval(core.config().batching.batch_timeout());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => drain(&core, &mut queue).await,
            _ = shutdown.changed() => break,
        }
    }

    queue.close();
    let mut rejected = 0;
    while let Ok(item) = queue.try_recv() {
        let _ = item.reply.send(Err(GovernorError::ShuttingDown));
        rejected += 1;
    }
    tracing::debug!(rejected, "auto-batcher stopped");
    rejected
}

async fn drain(core: &GovernorCore, queue: &mut mpsc::Receiver<QueuedText>) {
    let max = core.config().cuda.batch_size.max(1);
    loop {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match queue.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        if batch.is_empty() {
            return;
        }
        let full = batch.len() == max;

        let texts: Vec<String> = batch.iter().map(|q| q.text.clone()).collect();
        match core
            .generate_embeddings(&texts, &EmbeddingOptions::default())
            .await
        {
            Ok(results) => {
                for (item, result) in batch.into_iter().zip(results) {
                    let _ = item.reply.send(Ok(result));
                }
            }
            Err(e) => {
                tracing::warn!("queued batch of {} texts failed: {e}", texts.len());
                let message = e.to_string();
                for item in batch {
                    let _ = item.reply.send(Err(GovernorError::BatchFailed(message.clone())));
                }
            }
        }

        if !full {
            return;
        }
    }
}

/// Decays device utilization, refreshes rates, and warns on slow batches.
pub(crate) async fn run_metrics(core: Arc<GovernorCore>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(core.config().monitoring.metrics_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => core.refresh_metrics(),
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("metrics ticker stopped");
}
