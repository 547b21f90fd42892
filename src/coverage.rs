// Copyright 2026 Cornell University
// released under MIT License

//! # Functional coverage
//! Hit counters over finite domains: the logical input pair driven into the
//! DUT, consecutive protocol states of every monitored bus and the outputs
//! read back. The model is only read once at the end of a run.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::info;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

use crate::driver::ResultSink;
use crate::errors::HarnessResult;
use crate::monitor::{ProtocolState, SampleObserver, StateSample};
use crate::signals::Bus;

/// Name of the file written by `CoverageModel::export`
pub const COVERAGE_FILE: &str = "coverage.json";

#[derive(Error, Debug)]
pub enum CoverageExportError {
    #[error("failed to write coverage report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize coverage report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Counts how often each value of an explicit domain was seen
#[derive(Debug, Clone)]
pub struct CoverPoint {
    name: String,
    domain: Vec<u64>,
    hits: Vec<u64>,
    out_of_domain: u64,
}

impl CoverPoint {
    pub fn new(name: impl Into<String>, domain: &[u64]) -> Self {
        Self {
            name: name.into(),
            domain: domain.to_vec(),
            hits: vec![0; domain.len()],
            out_of_domain: 0,
        }
    }

    pub fn hit(&mut self, value: u64) {
        match self.domain.iter().position(|v| *v == value) {
            Some(idx) => self.hits[idx] += 1,
            None => self.out_of_domain += 1,
        }
    }

    fn report(&self) -> GroupReport {
        let bins = self
            .domain
            .iter()
            .zip(&self.hits)
            .map(|(value, hits)| BinReport {
                bin: value.to_string(),
                hits: *hits,
            })
            .collect();
        GroupReport::new(&self.name, &self.name, bins, self.out_of_domain)
    }
}

/// Counts every combination of two finite domains, given by their bin labels
#[derive(Debug, Clone)]
pub struct Cross {
    name: String,
    axes: (String, String),
    x: Vec<String>,
    y: Vec<String>,
    hits: FxHashMap<(usize, usize), u64>,
    out_of_domain: u64,
}

impl Cross {
    pub fn new(
        name: impl Into<String>,
        axes: (&str, &str),
        x: Vec<String>,
        y: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            axes: (axes.0.to_string(), axes.1.to_string()),
            x,
            y,
            hits: FxHashMap::default(),
            out_of_domain: 0,
        }
    }

    /// Records a hit of the bin at (`x`, `y`); indices outside the domains
    /// are only counted
    pub fn hit(&mut self, x: usize, y: usize) {
        if x < self.x.len() && y < self.y.len() {
            *self.hits.entry((x, y)).or_default() += 1;
        } else {
            self.out_of_domain += 1;
        }
    }

    pub fn hits(&self, x: usize, y: usize) -> u64 {
        self.hits.get(&(x, y)).copied().unwrap_or_default()
    }

    fn report(&self) -> GroupReport {
        let mut bins = vec![];
        for (xi, x) in self.x.iter().enumerate() {
            for (yi, y) in self.y.iter().enumerate() {
                bins.push(BinReport {
                    bin: format!("({x}, {y})"),
                    hits: self.hits(xi, yi),
                });
            }
        }
        let axes = format!("{} x {}", self.axes.0, self.axes.1);
        GroupReport::new(&self.name, &axes, bins, self.out_of_domain)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinReport {
    pub bin: String,
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub name: String,
    pub sampled: String,
    pub bins: Vec<BinReport>,
    pub out_of_domain: u64,
    pub bins_hit: usize,
    pub coverage: f64,
}

impl GroupReport {
    fn new(name: &str, sampled: &str, bins: Vec<BinReport>, out_of_domain: u64) -> Self {
        let bins_hit = bins.iter().filter(|b| b.hits > 0).count();
        Self {
            name: name.to_string(),
            sampled: sampled.to_string(),
            coverage: percent(bins_hit, bins.len()),
            bins,
            out_of_domain,
            bins_hit,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} ({}): {}/{} bins, {:.1}%",
            self.name,
            self.sampled,
            self.bins_hit,
            self.bins.len(),
            self.coverage
        );
        for bin in &self.bins {
            let _ = writeln!(out, "  {}: {}", bin.bin, bin.hits);
        }
        if self.out_of_domain > 0 {
            let _ = writeln!(out, "  out of domain: {}", self.out_of_domain);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub groups: Vec<GroupReport>,
    pub bins_hit: usize,
    pub bins_total: usize,
    pub coverage: f64,
}

impl CoverageReport {
    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            out.push_str(&group.render());
        }
        let _ = writeln!(
            out,
            "overall: {}/{} bins, {:.1}%",
            self.bins_hit, self.bins_total, self.coverage
        );
        out
    }
}

fn percent(hit: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hit as f64 * 100.0 / total as f64
    }
}

/// Every coverage group of a run
#[derive(Debug, Clone)]
pub struct CoverageModel {
    inputs: Cross,
    states: BTreeMap<Bus, Cross>,
    outputs: CoverPoint,
}

impl Default for CoverageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageModel {
    pub fn new() -> Self {
        let bits = || vec!["0".to_string(), "1".to_string()];
        let state_names = || {
            ProtocolState::ALL
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        };
        let inputs = Cross::new("inputs", ("a", "b"), bits(), bits());
        let states = Bus::ALL
            .into_iter()
            .map(|bus| {
                let cross = Cross::new(
                    format!("{bus}_states"),
                    ("previous", "current"),
                    state_names(),
                    state_names(),
                );
                (bus, cross)
            })
            .collect();
        Self {
            inputs,
            states,
            outputs: CoverPoint::new("outputs", &[0, 1]),
        }
    }

    /// Records the logical input pair of one iteration
    pub fn sample_inputs(&mut self, a: u64, b: u64) {
        let idx = |v: u64| usize::try_from(v).unwrap_or(usize::MAX);
        self.inputs.hit(idx(a), idx(b));
    }

    pub fn sample_output(&mut self, value: u64) {
        self.outputs.hit(value);
    }

    pub fn inputs(&self) -> &Cross {
        &self.inputs
    }

    pub fn states(&self, bus: Bus) -> Option<&Cross> {
        self.states.get(&bus)
    }

    pub fn report(&self) -> CoverageReport {
        let mut groups = vec![self.inputs.report()];
        groups.extend(self.states.values().map(Cross::report));
        groups.push(self.outputs.report());
        let bins_hit = groups.iter().map(|g| g.bins_hit).sum();
        let bins_total = groups.iter().map(|g| g.bins.len()).sum();
        CoverageReport {
            groups,
            bins_hit,
            bins_total,
            coverage: percent(bins_hit, bins_total),
        }
    }

    /// Writes the report as pretty-printed JSON to `dir/coverage.json`
    pub fn export(&self, dir: &Path) -> Result<PathBuf, CoverageExportError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(COVERAGE_FILE);
        let json = serde_json::to_string_pretty(&self.report())?;
        std::fs::write(&path, json)?;
        info!("Coverage report written to {}", path.display());
        Ok(path)
    }
}

fn state_index(state: ProtocolState) -> usize {
    match state {
        ProtocolState::Idle => 0,
        ProtocolState::Rdy => 1,
        ProtocolState::Txn => 2,
    }
}

impl SampleObserver for CoverageModel {
    fn observe(&mut self, sample: &StateSample) {
        if let Some(cross) = self.states.get_mut(&sample.bus) {
            cross.hit(state_index(sample.previous), state_index(sample.current));
        }
    }
}

/// Result sink that only records read values in the output coverpoint
pub struct CoverageRecorder {
    coverage: Rc<RefCell<CoverageModel>>,
}

impl CoverageRecorder {
    pub fn new(coverage: Rc<RefCell<CoverageModel>>) -> Self {
        Self { coverage }
    }
}

impl ResultSink for CoverageRecorder {
    fn accept(&mut self, value: u64) -> HarnessResult<()> {
        self.coverage.borrow_mut().sample_output(value);
        Ok(())
    }
}
