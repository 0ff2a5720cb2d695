//! Part and BOM catalog.
//!
//! Holds the master data the ledger validates against, and runs the BOM
//! graph guard synchronously on every BOM header and item write. A write that
//! fails the guard is rolled back before the catalog lock is released.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;

use factory_core::{BomId, DomainError, PartId, TenantId};
use factory_inventory::{Bom, BomEdge, BomError, BomGraph, BomItem, MAX_BOM_DEPTH, Part};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("part_no '{0}' already exists for this tenant")]
    PartNoTaken(String),

    #[error(transparent)]
    Part(#[from] DomainError),

    #[error(transparent)]
    Bom(#[from] BomError),
}

impl CatalogError {
    pub fn reason(&self) -> &'static str {
        match self {
            CatalogError::PartNoTaken(_) => "part_no_taken",
            CatalogError::Part(e) => e.reason(),
            CatalogError::Bom(e) => e.reason(),
        }
    }
}

/// Part lookup used by the ledger validator.
pub trait PartCatalog: Send + Sync {
    /// Lookup by id regardless of tenant; callers check tenant equality.
    fn part(&self, id: PartId) -> Option<Part>;
}

impl<C> PartCatalog for std::sync::Arc<C>
where
    C: PartCatalog + ?Sized,
{
    fn part(&self, id: PartId) -> Option<Part> {
        (**self).part(id)
    }
}

/// Cycle and depth checks over one tenant's full BOM graph.
pub trait BomGraphGuard {
    fn validate_acyclic(&self, tenant_id: TenantId, root_part_id: PartId) -> Result<(), BomError>;

    fn validate_max_depth(&self, tenant_id: TenantId, root_part_id: PartId, max_depth: usize) -> Result<(), BomError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    parts: HashMap<PartId, Part>,
    part_nos: HashSet<(TenantId, String)>,
    boms: HashMap<BomId, Bom>,
    revisions: HashSet<(TenantId, PartId, u32)>,
    items: Vec<BomItem>,
}

impl CatalogState {
    fn graph(&self, tenant_id: TenantId) -> BomGraph {
        BomGraph::from_edges(self.items.iter().filter(|i| i.tenant_id == tenant_id).filter_map(|i| {
            self.boms.get(&i.bom_id).map(|b| BomEdge {
                parent_part_id: b.parent_part_id,
                component_part_id: i.component_part_id,
            })
        }))
    }

    fn part_in(&self, tenant_id: TenantId, id: PartId) -> Result<&Part, BomError> {
        match self.parts.get(&id) {
            Some(p) if p.tenant_id == tenant_id => Ok(p),
            Some(_) => Err(BomError::TenantMismatch("BOM and part")),
            None => Err(BomError::PartNotFound(id)),
        }
    }

    /// Graph guard run after every BOM write: no cycle below `root`, and no
    /// chain longer than [`MAX_BOM_DEPTH`] below `root` or any assembly
    /// that uses it.
    fn guard(&self, tenant_id: TenantId, root: PartId) -> Result<(), BomError> {
        let graph = self.graph(tenant_id);
        graph.validate_acyclic(root)?;
        for node in std::iter::once(root).chain(graph.ancestors(root)) {
            graph.validate_max_depth(node, MAX_BOM_DEPTH)?;
        }
        Ok(())
    }
}

/// In-memory catalog for parts, BOM headers and BOM items.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a part; `(tenant, part_no)` is unique.
    pub fn add_part(&self, part: Part) -> Result<Part, CatalogError> {
        let mut state = self.state.write();
        let key = (part.tenant_id, part.part_no.clone());
        if state.part_nos.contains(&key) {
            return Err(CatalogError::PartNoTaken(part.part_no));
        }
        state.part_nos.insert(key);
        state.parts.insert(part.id, part.clone());
        Ok(part)
    }

    pub fn parts(&self, tenant_id: TenantId) -> Vec<Part> {
        let mut parts: Vec<_> = self
            .state
            .read()
            .parts
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        parts.sort_by(|a, b| a.part_no.cmp(&b.part_no));
        parts
    }

    pub fn add_bom(&self, tenant_id: TenantId, parent_part_id: PartId, revision_index: u32) -> Result<Bom, CatalogError> {
        let mut state = self.state.write();
        let parent = state.part_in(tenant_id, parent_part_id)?;
        let bom = Bom::new(tenant_id, parent, revision_index)?;

        let revision = (tenant_id, parent_part_id, revision_index);
        if state.revisions.contains(&revision) {
            return Err(BomError::DuplicateRevision {
                parent_part_id,
                revision_index,
            }
            .into());
        }

        state.revisions.insert(revision);
        state.boms.insert(bom.id, bom.clone());
        if let Err(e) = state.guard(tenant_id, parent_part_id) {
            state.boms.remove(&bom.id);
            state.revisions.remove(&revision);
            return Err(e.into());
        }

        tracing::debug!(%tenant_id, bom_id = %bom.id, %parent_part_id, revision_index, "bom created");
        Ok(bom)
    }

    pub fn add_bom_item(
        &self,
        tenant_id: TenantId,
        bom_id: BomId,
        component_part_id: PartId,
        qty_per: Decimal,
        is_direct: bool,
    ) -> Result<BomItem, CatalogError> {
        let mut state = self.state.write();
        let bom = match state.boms.get(&bom_id) {
            Some(b) if b.tenant_id == tenant_id => b.clone(),
            Some(_) => return Err(BomError::TenantMismatch("BOM and caller").into()),
            None => return Err(BomError::BomNotFound(bom_id).into()),
        };
        let component = state.part_in(tenant_id, component_part_id)?;
        let item = BomItem::new(&bom, component, qty_per, is_direct)?;

        if state
            .items
            .iter()
            .any(|i| i.bom_id == bom_id && i.component_part_id == component_part_id)
        {
            return Err(BomError::DuplicateComponent(component_part_id).into());
        }

        state.items.push(item.clone());
        if let Err(e) = state.guard(tenant_id, bom.parent_part_id) {
            state.items.pop();
            tracing::debug!(%tenant_id, %bom_id, %component_part_id, reason = e.reason(), "bom item rejected");
            return Err(e.into());
        }

        Ok(item)
    }

    pub fn bom_edges(&self, tenant_id: TenantId) -> Vec<BomEdge> {
        let state = self.state.read();
        state
            .items
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .filter_map(|i| {
                state.boms.get(&i.bom_id).map(|b| BomEdge {
                    parent_part_id: b.parent_part_id,
                    component_part_id: i.component_part_id,
                })
            })
            .collect()
    }
}

impl PartCatalog for InMemoryCatalog {
    fn part(&self, id: PartId) -> Option<Part> {
        self.state.read().parts.get(&id).cloned()
    }
}

impl BomGraphGuard for InMemoryCatalog {
    fn validate_acyclic(&self, tenant_id: TenantId, root_part_id: PartId) -> Result<(), BomError> {
        self.state.read().graph(tenant_id).validate_acyclic(root_part_id)
    }

    fn validate_max_depth(&self, tenant_id: TenantId, root_part_id: PartId, max_depth: usize) -> Result<(), BomError> {
        self.state
            .read()
            .graph(tenant_id)
            .validate_max_depth(root_part_id, max_depth)
    }
}
