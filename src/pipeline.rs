//! Building a flow graph from a TOML description.
//!
//! ```toml
//! [[flow]]
//! name = "reader"
//! factory = "file_read_flow"
//! [flow.params]
//! path = "/tmp/in.bin"
//! mem_size_pertime = "4096"
//!
//! [[flow]]
//! name = "writer"
//! factory = "file_write_flow"
//! [flow.params]
//! path = "/tmp/out.bin"
//!
//! [[link]]
//! up = "reader"
//! down = "writer"
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::params::ParamBuilder;
use crate::registry::MediaRegistry;

#[derive(Debug, Deserialize)]
struct PipelineDesc {
	#[serde(default)]
	flow: Vec<FlowDesc>,
	#[serde(default)]
	link: Vec<LinkDesc>,
}

#[derive(Debug, Deserialize)]
struct FlowDesc {
	name: String,
	factory: String,
	#[serde(default)]
	params: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LinkDesc {
	up: String,
	#[serde(default)]
	up_slot: usize,
	down: String,
	#[serde(default)]
	down_slot: usize,
}

/// An assembled graph, kept in description order.
pub struct Pipeline {
	flows: Vec<(String, Flow)>,
	/// Edges as indices into `flows`, for teardown ordering.
	edges: Vec<(usize, usize)>,
}

impl Pipeline {
	/// Instantiate every described flow through `registry` and wire the
	/// links. Duplicate names, dangling link endpoints and cycles are
	/// rejected before any flow is constructed.
	pub fn build(description: &str, registry: &MediaRegistry) -> Result<Pipeline> {
		let desc: PipelineDesc = toml::from_str(description)
			.map_err(|e| Error::invalid(format!("bad pipeline description: {e}")))?;

		let mut index = HashMap::new();
		for (i, flow) in desc.flow.iter().enumerate() {
			if index.insert(flow.name.clone(), i).is_some() {
				return Err(Error::invalid(format!("duplicate flow name {:?}", flow.name)));
			}
		}
		let mut edges = Vec::with_capacity(desc.link.len());
		for link in &desc.link {
			let up = *index
				.get(&link.up)
				.ok_or_else(|| Error::invalid(format!("link from unknown flow {:?}", link.up)))?;
			let down = *index
				.get(&link.down)
				.ok_or_else(|| Error::invalid(format!("link to unknown flow {:?}", link.down)))?;
			edges.push((up, down));
		}
		check_acyclic(desc.flow.len(), &edges)?;

		let mut flows: Vec<(String, Flow)> = Vec::with_capacity(desc.flow.len());
		for flow_desc in &desc.flow {
			let mut param = ParamBuilder::new();
			for (key, value) in &flow_desc.params {
				param = param.set(key, value);
			}
			let flow = registry.flows().create(&flow_desc.factory, &param.build()).map_err(|e| {
				// A half-built graph must not leak threads.
				for (_, built) in &flows {
					built.stop_all_threads();
				}
				tracing::error!("Building flow {:?} failed: {e}.", flow_desc.name);
				e
			})?;
			flows.push((flow_desc.name.clone(), flow));
		}

		for (link, &(up, down)) in desc.link.iter().zip(&edges) {
			let result =
				flows[up].1.add_down_flow(link.up_slot, &flows[down].1, link.down_slot);
			if let Err(e) = result {
				for (_, built) in &flows {
					built.stop_all_threads();
				}
				return Err(e);
			}
		}

		Ok(Pipeline { flows, edges })
	}

	pub fn flow(&self, name: &str) -> Option<&Flow> {
		self.flows.iter().find(|(n, _)| n == name).map(|(_, f)| f)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.flows.iter().map(|(n, _)| n.as_str())
	}

	/// Tear the graph down, consumers before producers, so sources observe
	/// their consumers detaching rather than delivering into stopped stages.
	pub fn stop(&self) {
		for &i in topological_order(self.flows.len(), &self.edges).iter().rev() {
			self.flows[i].1.stop_all_threads();
		}
	}
}

fn check_acyclic(nodes: usize, edges: &[(usize, usize)]) -> Result<()> {
	if topological_order(nodes, edges).len() != nodes {
		return Err(Error::invalid("pipeline graph has a cycle"));
	}
	Ok(())
}

/// Kahn's algorithm; sources first. Nodes on a cycle are omitted.
fn topological_order(nodes: usize, edges: &[(usize, usize)]) -> Vec<usize> {
	let mut in_degree = vec![0usize; nodes];
	let mut adjacency = vec![Vec::new(); nodes];
	for &(up, down) in edges {
		in_degree[down] += 1;
		adjacency[up].push(down);
	}
	let mut ready: Vec<usize> = (0..nodes).filter(|&n| in_degree[n] == 0).collect();
	let mut order = Vec::with_capacity(nodes);
	while let Some(node) = ready.pop() {
		order.push(node);
		for &next in &adjacency[node] {
			in_degree[next] -= 1;
			if in_degree[next] == 0 {
				ready.push(next);
			}
		}
	}
	order
}
