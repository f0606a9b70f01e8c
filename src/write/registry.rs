//! Writer registration, write planning and plan execution.
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use super::{DataChange, Writer, WriterCustomizer};
use crate::context::WriteContext;
use crate::data::Node;
use crate::error::{AppliedWrite, EngineError, Operation, OrderingConflict, WriteFailure};
use crate::logging::StepStatus;
use crate::path::NodePath;
use crate::registry::{HandlerRegistry, OrderedHandlers, Registered, Relations};
use crate::schema::{NavigationError, NavigationTable, strip_subtree};

/// Collects writer registrations before they are frozen into a
/// [`WriterRegistry`].
#[derive(Debug)]
pub struct WriterRegistryBuilder {
    registry: HandlerRegistry<Writer>,
    nav: Arc<NavigationTable>,
}

impl WriterRegistryBuilder {
    /// Empty builder for trees described by `nav`.
    #[must_use]
    pub fn new(nav: Arc<NavigationTable>) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            nav,
        }
    }

    /// Register a writer with explicit relations.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn register(
        &mut self,
        node_type: NodePath,
        writer: Writer,
        relations: Relations,
    ) -> Result<&mut Self, OrderingConflict> {
        self.registry.register(node_type, writer, relations)?;
        Ok(self)
    }

    /// Register a writer.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add(&mut self, node_type: NodePath, writer: Writer) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, writer, Relations::new())
    }

    /// Register a writer whose creates and updates run before `related`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add_before(
        &mut self,
        node_type: NodePath,
        writer: Writer,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, writer, Relations::new().before(related.clone()))
    }

    /// Register a writer whose creates and updates run after `related`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add_after(
        &mut self,
        node_type: NodePath,
        writer: Writer,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, writer, Relations::new().after(related.clone()))
    }

    /// Register a writer that also handles every type in `children`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn subtree_add(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        writer: Writer,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, writer, Relations::new().subtree(children))
    }

    /// Subtree writer that runs before `related`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn subtree_add_before(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        writer: Writer,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(
            node_type,
            writer,
            Relations::new().subtree(children).before(related.clone()),
        )
    }

    /// Subtree writer that runs after `related`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn subtree_add_after(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        writer: Writer,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(
            node_type,
            writer,
            Relations::new().subtree(children).after(related.clone()),
        )
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> WriterRegistry {
        WriterRegistry {
            handlers: self.registry.build(),
            nav: self.nav,
        }
    }
}

/// One step of a write plan.
#[derive(Debug, Clone)]
pub struct PlannedWrite {
    writer: Writer,
    /// Concrete path of the node.
    pub path: NodePath,
    /// What the writer has to do.
    pub change: DataChange,
}

impl PlannedWrite {
    /// Operation of this step.
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        self.change.operation()
    }
}

/// Frozen set of writers; plans and executes writes.
#[derive(Debug)]
pub struct WriterRegistry {
    handlers: OrderedHandlers<Writer>,
    nav: Arc<NavigationTable>,
}

impl WriterRegistry {
    /// Node types with a writer, in create/update order. Deletes run in the
    /// reverse order.
    #[must_use]
    pub fn order(&self) -> Vec<&NodePath> {
        self.handlers.order()
    }

    /// Decompose a before/after pair at `base` into writer steps.
    ///
    /// Every writer at or below `base`'s type receives the instances of its
    /// type found in each side, with subtrees owned by other writers cut
    /// out. Unchanged instances produce no step. Deletes come first, in
    /// reverse writer order; creates and updates follow in writer order.
    ///
    /// # Errors
    ///
    /// - [`WriteFailure::Unhandled`] if data changed where no writer is
    ///   registered.
    /// - [`WriteFailure::Malformed`] if the data does not fit the schema or
    ///   `base` lies inside a writer's node.
    pub fn plan(
        &self,
        base: &NodePath,
        before: Option<&Node>,
        after: Option<&Node>,
    ) -> Result<Vec<PlannedWrite>, WriteFailure> {
        let base_type = base.normalize();
        if let Some(enclosing) = self
            .handlers
            .iter()
            .find(|r| r.node_type.is_ancestor_of(&base_type))
        {
            return Err(WriteFailure::Malformed {
                path: base.clone(),
                reason: format!("path lies inside the node written by {}", enclosing.node_type),
            });
        }

        self.check_handled(base, &base_type, before, after)?;

        let mut deletes = Vec::new();
        let mut writes = Vec::new();
        for registered in self
            .handlers
            .iter()
            .filter(|r| r.node_type.starts_with(&base_type))
        {
            let mut old = self.instances_of(registered, base, before)?;
            let new = self.instances_of(registered, base, after)?;
            for (path, after_node) in new {
                let before_node = old
                    .iter()
                    .position(|(p, _)| p == &path)
                    .map(|i| old.remove(i).1);
                push_step(&mut writes, registered, path, before_node, Some(after_node));
            }
            let mut removed = Vec::new();
            for (path, before_node) in old {
                push_step(&mut removed, registered, path, Some(before_node), None);
            }
            // Keep device order of the before data within one writer.
            deletes.push(removed);
        }

        let mut plan: Vec<PlannedWrite> = deletes.into_iter().rev().flatten().collect();
        plan.extend(writes);
        debug!(target: "treeconf::write", base = %base, steps = plan.len(), "write plan ready");
        Ok(plan)
    }

    /// Plan and execute a write, stopping at the first failing step.
    ///
    /// A writer without in-place update support receives a delete of the
    /// old node followed by a create of the new one. Mapping changes of the
    /// failing step are discarded; those of earlier steps stay in the
    /// context's overlay.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Write`] if planning fails; nothing was executed.
    /// - [`EngineError::WritePlan`] if a step fails; `applied` lists the
    ///   steps that completed.
    pub fn write(
        &self,
        base: &NodePath,
        before: Option<&Node>,
        after: Option<&Node>,
        ctx: &mut WriteContext<'_>,
    ) -> Result<Vec<AppliedWrite>, EngineError> {
        let plan = self.plan(base, before, after)?;
        let mut applied = Vec::with_capacity(plan.len());
        for step in &plan {
            if let Err(failure) = execute(step, ctx, &mut applied) {
                ctx.rollback_step();
                ctx.log().record_step(
                    failure.path(),
                    failure.operation().unwrap_or(Operation::Update),
                    StepStatus::Failed,
                    Some(&failure.to_string()),
                );
                return Err(EngineError::WritePlan { failure, applied });
            }
        }
        Ok(applied)
    }

    fn instances_of(
        &self,
        registered: &Registered<Writer>,
        base: &NodePath,
        data: Option<&Node>,
    ) -> Result<Vec<(NodePath, Node)>, WriteFailure> {
        let Some(data) = data else {
            return Ok(Vec::new());
        };
        let mut instances = self
            .nav
            .instances(base, data, &registered.node_type)
            .map_err(malformed)?;
        let foreign: Vec<&NodePath> = self
            .handlers
            .iter()
            .filter(|other| registered.node_type.is_ancestor_of(&other.node_type))
            .filter(|other| !registered.covers(&other.node_type))
            .map(|other| &other.node_type)
            .collect();
        for (_, node) in &mut instances {
            for child_type in &foreign {
                if let Some(rel) = child_type.relative_to(&registered.node_type) {
                    strip_subtree(node, rel);
                }
            }
        }
        Ok(instances)
    }

    /// Fail if anything outside every writer's reach differs.
    fn check_handled(
        &self,
        base: &NodePath,
        base_type: &NodePath,
        before: Option<&Node>,
        after: Option<&Node>,
    ) -> Result<(), WriteFailure> {
        if self.handlers.get(base_type).is_some() {
            return Ok(());
        }
        let residue = |data: Option<&Node>| {
            let mut value = data.cloned().unwrap_or(Value::Null);
            for registered in &self.handlers {
                let Some(rel) = registered.node_type.relative_to(base_type) else {
                    continue;
                };
                match &mut value {
                    Value::Array(elements) => {
                        for element in elements {
                            strip_subtree(element, rel);
                        }
                    }
                    other => strip_subtree(other, rel),
                }
            }
            prune(value)
        };
        if residue(before) == residue(after) {
            return Ok(());
        }
        Err(WriteFailure::Unhandled { path: base.clone() })
    }
}

fn push_step(
    plan: &mut Vec<PlannedWrite>,
    registered: &Registered<Writer>,
    path: NodePath,
    before: Option<Node>,
    after: Option<Node>,
) {
    let change = DataChange::classify(before, after);
    if change == DataChange::Unchanged {
        trace!(target: "treeconf::write", path = %path, "unchanged");
        return;
    }
    plan.push(PlannedWrite {
        writer: registered.handler.clone(),
        path,
        change,
    });
}

fn execute(
    step: &PlannedWrite,
    ctx: &mut WriteContext<'_>,
    applied: &mut Vec<AppliedWrite>,
) -> Result<(), WriteFailure> {
    let writer = step.writer.customizer();
    let path = &step.path;
    match &step.change {
        DataChange::Create { after } => create(writer, path, after, ctx, applied),
        DataChange::Delete { before } => delete(writer, path, before, ctx, applied),
        DataChange::Update { before, after } if writer.supports_update() => {
            ctx.checkpoint();
            writer
                .update(path, before, after, ctx)
                .map_err(|e| WriteFailure::Update {
                    path: path.clone(),
                    before: before.clone(),
                    after: after.clone(),
                    source: e.into(),
                })?;
            applied_step(ctx, applied, path, Operation::Update);
            Ok(())
        }
        DataChange::Update { before, after } => {
            debug!(target: "treeconf::write", path = %path, "update as delete then create");
            delete(writer, path, before, ctx, applied)?;
            create(writer, path, after, ctx, applied)
        }
        DataChange::Unchanged => Ok(()),
    }
}

fn create(
    writer: &dyn WriterCustomizer,
    path: &NodePath,
    after: &Node,
    ctx: &mut WriteContext<'_>,
    applied: &mut Vec<AppliedWrite>,
) -> Result<(), WriteFailure> {
    ctx.checkpoint();
    writer
        .create(path, after, ctx)
        .map_err(|e| WriteFailure::Create {
            path: path.clone(),
            after: after.clone(),
            source: e.into(),
        })?;
    applied_step(ctx, applied, path, Operation::Create);
    Ok(())
}

fn delete(
    writer: &dyn WriterCustomizer,
    path: &NodePath,
    before: &Node,
    ctx: &mut WriteContext<'_>,
    applied: &mut Vec<AppliedWrite>,
) -> Result<(), WriteFailure> {
    ctx.checkpoint();
    writer
        .delete(path, before, ctx)
        .map_err(|e| WriteFailure::Delete {
            path: path.clone(),
            before: before.clone(),
            source: e.into(),
        })?;
    applied_step(ctx, applied, path, Operation::Delete);
    Ok(())
}

fn applied_step(
    ctx: &WriteContext<'_>,
    applied: &mut Vec<AppliedWrite>,
    path: &NodePath,
    operation: Operation,
) {
    ctx.log().record_step(path, operation, StepStatus::Ok, None);
    applied.push(AppliedWrite {
        path: path.clone(),
        operation,
    });
}

fn malformed(e: NavigationError) -> WriteFailure {
    WriteFailure::Malformed {
        path: e.path,
        reason: e.reason,
    }
}

/// Drop empty objects and arrays left behind after stripping.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let fields: serde_json::Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if fields.is_empty() {
                Value::Null
            } else {
                Value::Object(fields)
            }
        }
        Value::Array(items) => {
            let items: Vec<Value> = items
                .into_iter()
                .map(prune)
                .filter(|v| !v.is_null())
                .collect();
            if items.is_empty() {
                Value::Null
            } else {
                Value::Array(items)
            }
        }
        other => other,
    }
}
