// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Graph command - visualize the step graph

use miette::Result;
use std::path::PathBuf;

use super::{build_graph, load_config, GraphFormat};

/// Run the graph command
pub async fn run(config_path: PathBuf, format: GraphFormat, verbose: bool) -> Result<()> {
    let config = load_config(&config_path, verbose)?;
    let graph = build_graph(&config)?;

    let output = match format {
        GraphFormat::Text => graph.to_text(),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
