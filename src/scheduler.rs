//! Topological Scheduler
//!
//! State machine over modules driving generation order. Stale modules start
//! `Pending`; everything else starts `Done`. A module becomes `Ready` once all
//! of its scheduled dependencies are `Done`. Among ready modules the one with
//! the longest chain of dependents waiting on it goes first, ties broken by
//! name. When a module fails, every transitive dependent is `Blocked` and is
//! never handed out.

use crate::deps::{toposort, ModuleDag};
use crate::error::JauntError;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Blocked,
}

impl ModuleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ModuleState::Done | ModuleState::Failed | ModuleState::Blocked
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: usize,
    module: String,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lexicographically smaller name.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.module.cmp(&self.module))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Length of the longest chain of scheduled dependents below each module.
pub fn critical_path_lengths(deps: &ModuleDag) -> Result<BTreeMap<String, usize>, JauntError> {
    let order = toposort(deps)?;
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (module, module_deps) in deps {
        for dep in module_deps {
            dependents.entry(dep.as_str()).or_default().push(module.as_str());
        }
    }

    let mut lengths: BTreeMap<String, usize> = BTreeMap::new();
    for module in order.iter().rev() {
        let length = dependents
            .get(module.as_str())
            .into_iter()
            .flatten()
            .map(|d| lengths.get(*d).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        lengths.insert(module.clone(), length);
    }
    Ok(lengths)
}

pub struct Scheduler {
    states: BTreeMap<String, ModuleState>,
    deps: ModuleDag,
    dependents: ModuleDag,
    unfinished_deps: BTreeMap<String, usize>,
    priority: BTreeMap<String, usize>,
    ready: BinaryHeap<ReadyEntry>,
    blocked_by: BTreeMap<String, BTreeSet<String>>,
    running: usize,
    max_running: usize,
}

impl Scheduler {
    /// Schedule `stale` modules out of `modules` over `dag`.
    ///
    /// Edges to modules that are not stale count as satisfied. A cycle among
    /// stale modules is a `DependencyCycle` error.
    pub fn new(
        modules: impl IntoIterator<Item = String>,
        stale: &BTreeSet<String>,
        dag: &ModuleDag,
        max_running: usize,
    ) -> Result<Self, JauntError> {
        let mut states: BTreeMap<String, ModuleState> = modules
            .into_iter()
            .map(|m| {
                let state = if stale.contains(&m) {
                    ModuleState::Pending
                } else {
                    ModuleState::Done
                };
                (m, state)
            })
            .collect();
        for m in stale {
            states.entry(m.clone()).or_insert(ModuleState::Pending);
        }

        let mut deps: ModuleDag = BTreeMap::new();
        let mut dependents: ModuleDag = BTreeMap::new();
        for m in stale {
            let scheduled: BTreeSet<String> = dag
                .get(m)
                .into_iter()
                .flatten()
                .filter(|d| stale.contains(*d) && *d != m)
                .cloned()
                .collect();
            for d in &scheduled {
                dependents.entry(d.clone()).or_default().insert(m.clone());
            }
            deps.insert(m.clone(), scheduled);
        }

        let priority = critical_path_lengths(&deps)?;

        let mut scheduler = Self {
            states,
            unfinished_deps: deps.iter().map(|(m, d)| (m.clone(), d.len())).collect(),
            deps,
            dependents,
            priority,
            ready: BinaryHeap::new(),
            blocked_by: BTreeMap::new(),
            running: 0,
            max_running: max_running.max(1),
        };
        let initially_ready: Vec<String> = scheduler
            .unfinished_deps
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(m, _)| m.clone())
            .collect();
        for m in initially_ready {
            scheduler.make_ready(m);
        }
        Ok(scheduler)
    }

    fn make_ready(&mut self, module: String) {
        self.states.insert(module.clone(), ModuleState::Ready);
        let priority = self.priority.get(&module).copied().unwrap_or(0);
        self.ready.push(ReadyEntry { priority, module });
    }

    /// Hand out the next ready module, or `None` when nothing is ready or the
    /// concurrency bound is reached.
    pub fn next_ready(&mut self) -> Option<String> {
        if self.running >= self.max_running {
            return None;
        }
        while let Some(entry) = self.ready.pop() {
            if self.states.get(&entry.module) != Some(&ModuleState::Ready) {
                continue;
            }
            self.states.insert(entry.module.clone(), ModuleState::Running);
            self.running += 1;
            return Some(entry.module);
        }
        None
    }

    fn finish_running(&mut self, module: &str) {
        if self.states.get(module) == Some(&ModuleState::Running) {
            self.running = self.running.saturating_sub(1);
        }
    }

    /// Record success; returns modules that became ready.
    pub fn mark_done(&mut self, module: &str) -> Vec<String> {
        self.finish_running(module);
        self.states.insert(module.to_string(), ModuleState::Done);

        let mut newly_ready = Vec::new();
        let dependents: Vec<String> = self
            .dependents
            .get(module)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        for dependent in dependents {
            let Some(count) = self.unfinished_deps.get_mut(&dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && self.states.get(&dependent) == Some(&ModuleState::Pending) {
                newly_ready.push(dependent.clone());
                self.make_ready(dependent);
            }
        }
        newly_ready
    }

    /// Record failure; returns every module newly blocked by it.
    pub fn mark_failed(&mut self, module: &str) -> Vec<String> {
        self.finish_running(module);
        self.states.insert(module.to_string(), ModuleState::Failed);

        let mut newly_blocked = Vec::new();
        let mut queue: Vec<String> = vec![module.to_string()];
        let mut seen: BTreeSet<String> = BTreeSet::new();
        while let Some(current) = queue.pop() {
            for dependent in self.dependents.get(&current).into_iter().flatten() {
                if !seen.insert(dependent.clone()) {
                    continue;
                }
                match self.states.get(dependent).copied() {
                    Some(ModuleState::Pending) | Some(ModuleState::Ready) => {
                        self.states.insert(dependent.clone(), ModuleState::Blocked);
                        newly_blocked.push(dependent.clone());
                    }
                    Some(ModuleState::Blocked) => {}
                    _ => continue,
                }
                self.blocked_by
                    .entry(dependent.clone())
                    .or_default()
                    .insert(module.to_string());
                queue.push(dependent.clone());
            }
        }
        newly_blocked
    }

    pub fn state(&self, module: &str) -> Option<ModuleState> {
        self.states.get(module).copied()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn has_ready(&self) -> bool {
        self.states.values().any(|s| *s == ModuleState::Ready)
    }

    /// True once every module is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    /// Modules still waiting with nothing running or ready to unblock them.
    pub fn stuck(&self) -> Vec<String> {
        if self.running > 0 || self.has_ready() {
            return Vec::new();
        }
        self.states
            .iter()
            .filter(|(_, s)| **s == ModuleState::Pending)
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Scheduled dependencies of `module` (stale modules only).
    pub fn scheduled_deps(&self, module: &str) -> Option<&BTreeSet<String>> {
        self.deps.get(module)
    }

    /// Blocked module -> failed upstream modules responsible.
    pub fn blocked(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.blocked_by
    }

    pub fn modules_in(&self, state: ModuleState) -> BTreeSet<String> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(m, _)| m.clone())
            .collect()
    }
}
