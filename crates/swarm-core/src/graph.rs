use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use swarm_store::{StateStore, TaskFilter};
use swarm_types::{Task, TaskStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphError {
    /// Adding the edge would close a directed cycle; `path` walks the loop.
    CycleDetected { path: Vec<String> },
    Store { message: String },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::CycleDetected { path } => {
                write!(f, "dependency cycle detected: {}", path.join(" -> "))
            }
            GraphError::Store { message } => write!(f, "store failure: {message}"),
        }
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    fn store(error: anyhow::Error) -> Self {
        GraphError::Store {
            message: error.to_string(),
        }
    }
}

/// DAG over tasks. Storage is delegated to the state store; this layer owns
/// the algorithms. All traversal is iterative.
#[derive(Clone)]
pub struct DependencyGraph {
    store: Arc<dyn StateStore>,
}

impl DependencyGraph {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Rejects self-edges and any edge that would close a cycle; nothing is
    /// persisted on rejection.
    pub async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<(), GraphError> {
        if task_id == depends_on {
            return Err(GraphError::CycleDetected {
                path: vec![task_id.to_string(), task_id.to_string()],
            });
        }
        if let Some(mut path) = self.path_between(depends_on, task_id).await? {
            // depends_on already reaches task_id, so the new edge closes a loop.
            path.push(depends_on.to_string());
            return Err(GraphError::CycleDetected { path });
        }
        self.store
            .add_dependency(task_id, depends_on)
            .await
            .map_err(GraphError::store)
    }

    pub async fn remove_dependency(
        &self,
        task_id: &str,
        depends_on: &str,
    ) -> Result<(), GraphError> {
        self.store
            .remove_dependency(task_id, depends_on)
            .await
            .map_err(GraphError::store)
    }

    pub async fn get_dependencies(&self, task_id: &str) -> Result<Vec<String>, GraphError> {
        self.store
            .dependencies_of(task_id)
            .await
            .map_err(GraphError::store)
    }

    pub async fn get_dependents(&self, task_id: &str) -> Result<Vec<String>, GraphError> {
        self.store
            .dependents_of(task_id)
            .await
            .map_err(GraphError::store)
    }

    /// Transitive closure of dependencies, excluding the task itself.
    pub async fn get_dependency_chain(&self, task_id: &str) -> Result<Vec<String>, GraphError> {
        self.store
            .dependency_chain(task_id)
            .await
            .map_err(GraphError::store)
    }

    /// Pending tasks whose direct dependencies are all completed. A missing
    /// dependency task counts as unmet.
    pub async fn get_ready_tasks(&self) -> Result<Vec<Task>, GraphError> {
        let pending = self
            .store
            .list_tasks(&TaskFilter::with_status(TaskStatus::Pending))
            .await
            .map_err(GraphError::store)?;
        let mut ready = Vec::new();
        for task in pending {
            if self
                .store
                .dependencies_completed(&task.id)
                .await
                .map_err(GraphError::store)?
            {
                ready.push(task);
            }
        }
        Ok(ready)
    }

    /// Kahn's algorithm over all known tasks. Fails with cycle-detected when
    /// the emitted order is shorter than the task count.
    pub async fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let (nodes, forward) = self.snapshot().await?;
        let node_set: HashSet<&String> = nodes.iter().collect();

        let mut in_degree: HashMap<&String, usize> = nodes.iter().map(|id| (id, 0)).collect();
        for (task, deps) in &forward {
            if !node_set.contains(task) {
                continue;
            }
            let count = deps.iter().filter(|dep| node_set.contains(dep)).count();
            in_degree.insert(task, count);
        }

        let mut queue: VecDeque<&String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            for (task, deps) in &forward {
                if !node_set.contains(task) || !deps.iter().any(|dep| dep == id) {
                    continue;
                }
                let degree = in_degree.get_mut(task).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(task);
                }
            }
        }

        if order.len() != nodes.len() {
            let path = self
                .detect_cycles()
                .await?
                .unwrap_or_default();
            return Err(GraphError::CycleDetected { path });
        }
        Ok(order)
    }

    /// Coloured DFS; returns the first cycle's path, or `None` when acyclic.
    pub async fn detect_cycles(&self) -> Result<Option<Vec<String>>, GraphError> {
        let (nodes, forward) = self.snapshot().await?;

        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        let mut colour: HashMap<String, Colour> =
            nodes.iter().map(|id| (id.clone(), Colour::White)).collect();
        for deps in forward.values() {
            for dep in deps {
                colour.entry(dep.clone()).or_insert(Colour::White);
            }
        }

        let roots: Vec<String> = colour.keys().cloned().collect();
        for root in roots {
            if colour[&root] != Colour::White {
                continue;
            }
            // Explicit stack of (node, next-child-index) plus the grey path.
            let mut stack: Vec<(String, usize)> = vec![(root.clone(), 0)];
            let mut path: Vec<String> = vec![root.clone()];
            colour.insert(root, Colour::Grey);

            while let Some((node, child_index)) = stack.last().cloned() {
                let children = forward.get(&node).cloned().unwrap_or_default();
                if child_index >= children.len() {
                    colour.insert(node, Colour::Black);
                    stack.pop();
                    path.pop();
                    continue;
                }
                stack.last_mut().expect("non-empty stack").1 += 1;
                let child = children[child_index].clone();
                match colour.get(&child).copied().unwrap_or(Colour::White) {
                    Colour::Grey => {
                        let start = path.iter().position(|id| id == &child).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..].to_vec();
                        cycle.push(child);
                        return Ok(Some(cycle));
                    }
                    Colour::White => {
                        colour.insert(child.clone(), Colour::Grey);
                        path.push(child.clone());
                        stack.push((child, 0));
                    }
                    Colour::Black => {}
                }
            }
        }
        Ok(None)
    }

    /// Iterative DFS from `from` along forward edges; returns the node path
    /// `from -> ... -> to` when reachable.
    async fn path_between(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Option<Vec<String>>, GraphError> {
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack = vec![from.to_string()];
        seen.insert(from.to_string());

        while let Some(node) = stack.pop() {
            if node == to {
                let mut path = vec![node.clone()];
                let mut cursor = node;
                while let Some(parent) = parents.get(&cursor) {
                    path.push(parent.clone());
                    cursor = parent.clone();
                }
                path.reverse();
                return Ok(Some(path));
            }
            let deps = self
                .store
                .dependencies_of(&node)
                .await
                .map_err(GraphError::store)?;
            for dep in deps {
                if seen.insert(dep.clone()) {
                    parents.insert(dep.clone(), node.clone());
                    stack.push(dep);
                }
            }
        }
        Ok(None)
    }

    async fn snapshot(&self) -> Result<(Vec<String>, HashMap<String, Vec<String>>), GraphError> {
        let tasks = self
            .store
            .list_tasks(&TaskFilter::default())
            .await
            .map_err(GraphError::store)?;
        let nodes: Vec<String> = tasks.iter().map(|task| task.id.clone()).collect();
        let mut forward = HashMap::new();
        for node in &nodes {
            let deps = self
                .store
                .dependencies_of(node)
                .await
                .map_err(GraphError::store)?;
            if !deps.is_empty() {
                forward.insert(node.clone(), deps);
            }
        }
        Ok((nodes, forward))
    }
}
