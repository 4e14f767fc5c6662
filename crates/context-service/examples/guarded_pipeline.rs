// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: a slice → pack → embed pipeline under a warming device.
//!
//! A scripted probe heats the device from 62°C to 103°C. Each round runs the
//! full pipeline through the guarded wrapper, showing how the limits shrink,
//! when the GPU preference is dropped, and when work is refused.
//!
//! ```bash
//! cargo run -p context-service --example guarded_pipeline
//! ```

use async_trait::async_trait;
use context_service::{
    ContextError, ContextNode, ContextPackService, ContextSliceService, GuardedRequest,
    GuardedResponse, PackOptions, PackedContext, ServiceConfig, SliceRecipe, SliceResult,
    Subgraph, ThermalAwareContextService,
};
use resource_governor::{
    ByteSize, ComputeTarget, DenseEmbedder, DeviceSpec, EmbedderError, EmbeddingOptions,
};
use std::sync::Arc;
use thermal_monitor::ScriptedProbe;

/// Breadth-first slice over a synthetic call graph with fan-out 3.
struct SyntheticGraph;

#[async_trait]
impl ContextSliceService for SyntheticGraph {
    async fn slice(&self, recipe: SliceRecipe) -> Result<SliceResult, ContextError> {
        let mut nodes = Vec::new();
        let mut frontier = recipe.anchors.clone();
        for depth in 0..recipe.max_depth {
            let mut next = Vec::new();
            for id in frontier {
                if nodes.len() as u32 >= recipe.max_nodes {
                    break;
                }
                next.extend((0..3).map(|i| format!("{id}.{i}")));
                nodes.push(ContextNode {
                    content: format!("source of {id}"),
                    id,
                    depth,
                });
            }
            frontier = next;
        }
        let truncated = nodes.len() as u32 >= recipe.max_nodes;
        Ok(SliceResult {
            subgraph: Subgraph {
                nodes,
                edges: Vec::new(),
            },
            truncated,
        })
    }
}

struct Concatenate;

#[async_trait]
impl ContextPackService for Concatenate {
    async fn pack(
        &self,
        subgraph: Subgraph,
        options: PackOptions,
    ) -> Result<PackedContext, ContextError> {
        let mut content = String::new();
        for node in &subgraph.nodes {
            content.push_str(&node.content);
            content.push('\n');
        }
        let token_count = content.split_whitespace().count().min(options.token_budget);
        Ok(PackedContext {
            content,
            token_count,
            node_count: subgraph.node_count(),
        })
    }
}

/// Hashes characters into a tiny vector.
struct ToyEmbedder;

#[async_trait]
impl DenseEmbedder for ToyEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _target: ComputeTarget,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 4];
                for (i, b) in t.bytes().enumerate() {
                    v[i % 4] += f32::from(b) / 255.0;
                }
                v
            })
            .collect())
    }

    fn name(&self) -> &str {
        "toy"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut config = ServiceConfig::default();
    config
        .governor
        .devices
        .push(DeviceSpec::new("gpu0", ByteSize::from_gb(4)));

    // Each round takes several readings; repeat each step so a round sees
    // one temperature.
    let steps = [62.0, 66.0, 74.0, 78.0, 84.0, 88.0, 93.0, 103.0];
    let probe = ScriptedProbe::new(steps.iter().flat_map(|t| [*t; 7]));
    config.context.sample_during_calls = false;

    let service = ThermalAwareContextService::from_config(
        &config,
        Arc::new(probe),
        Arc::new(SyntheticGraph),
        Arc::new(Concatenate),
    )?;
    if let Some(governor) = service.governor() {
        governor.initialize(Arc::new(ToyEmbedder), None)?;
    }

    println!(
        "{:<8} {:<10} {:>12} {:>8} {:>10} {:<12}",
        "Temp", "Zone", "Depth/Nodes", "Packed", "Embedded", "Outcome",
    );
    println!("{}", "-".repeat(66));

    for _ in steps {
        let recipe = SliceRecipe::new(5, 50).with_anchor("main");
        let GuardedResponse::Slice(slice) =
            service.guarded_operation(GuardedRequest::Slice(recipe)).await
        else {
            unreachable!("slice request yields a slice response");
        };

        let (mut packed, mut embedded) = (0, 0);
        if slice.outcome.has_output() {
            let pack = service
                .thermal_aware_pack(slice.result.subgraph.clone(), PackOptions::default())
                .await;
            packed = pack.packed.token_count;

            let texts: Vec<String> = slice
                .result
                .subgraph
                .nodes
                .iter()
                .map(|n| n.content.clone())
                .collect();
            let embed = service
                .thermal_aware_embed(&texts, EmbeddingOptions::default())
                .await;
            embedded = embed.embeddings.len();
        }

        println!(
            "{:<8} {:<10} {:>12} {:>8} {:>10} {}",
            format!("{:.0}°C", slice.thermal.temperature_c),
            slice.thermal.zone.to_string(),
            format!("{}/{}", slice.effective.max_depth, slice.effective.max_nodes),
            packed,
            embedded,
            slice.outcome,
        );
    }

    if let Some(governor) = service.governor() {
        println!("\n{}", governor.get_metrics().summary());
        governor.stop().await;
    }
    Ok(())
}
