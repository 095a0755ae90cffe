//! # Equation Module
//!
//! Named formulas the operator can pick from, backed by a record store.
//!
//! The store is passed in explicitly. The book only keeps a listed copy of
//! the records and the id of the selected one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SoilLinkError};
use crate::formula;

/// Probe values a formula must evaluate with before it is stored
pub const PROBE_X: f64 = 1.5;
pub const PROBE_XP: f64 = 1.0;
pub const PROBE_DX: f64 = 0.5;

/// A stored, named formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub id: i64,
    pub name: String,
    pub formula: String,
    pub created_at: DateTime<Utc>,
}

/// Record store for equations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EquationStore: Send + Sync {
    /// All equations, in the store's presentation order
    async fn list(&self) -> Result<Vec<Equation>>;

    /// Store a new equation and return its id
    async fn insert(&self, name: &str, formula: &str) -> Result<i64>;

    async fn update(&self, equation: &Equation) -> Result<()>;

    async fn delete(&self, equation: &Equation) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryRecords {
    next_id: i64,
    equations: Vec<Equation>,
}

/// In-process store, listing newest first
#[derive(Debug, Default)]
pub struct MemoryEquationStore {
    records: Mutex<MemoryRecords>,
}

impl MemoryEquationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EquationStore for MemoryEquationStore {
    async fn list(&self) -> Result<Vec<Equation>> {
        let records = self.records.lock().await;
        let mut equations = records.equations.clone();
        equations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(equations)
    }

    async fn insert(&self, name: &str, formula: &str) -> Result<i64> {
        let mut records = self.records.lock().await;
        records.next_id += 1;
        let id = records.next_id;
        records.equations.push(Equation {
            id,
            name: name.to_string(),
            formula: formula.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update(&self, equation: &Equation) -> Result<()> {
        let mut records = self.records.lock().await;
        let existing = records
            .equations
            .iter_mut()
            .find(|e| e.id == equation.id)
            .ok_or_else(|| SoilLinkError::Equation(format!("no equation with id {}", equation.id)))?;
        existing.name = equation.name.clone();
        existing.formula = equation.formula.clone();
        Ok(())
    }

    async fn delete(&self, equation: &Equation) -> Result<()> {
        let mut records = self.records.lock().await;
        records.equations.retain(|e| e.id != equation.id);
        Ok(())
    }
}

/// Check a name/formula pair before it is stored
///
/// # Errors
///
/// Returns `Equation` for a blank name, or the formula fault when the
/// formula does not evaluate with the probe values.
pub fn validate_entry(name: &str, formula: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SoilLinkError::Equation("name cannot be empty".to_string()));
    }
    formula::validate(formula, PROBE_X, PROBE_XP, PROBE_DX)?;
    Ok(())
}

/// Listed equations plus the operator's selection
pub struct EquationBook<S: EquationStore> {
    store: S,
    equations: Vec<Equation>,
    selected: Option<i64>,
}

impl<S: EquationStore> EquationBook<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            equations: Vec::new(),
            selected: None,
        }
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Reload the listed copy from the store
    pub async fn refresh(&mut self) -> Result<()> {
        self.equations = self.store.list().await?;
        debug!("Loaded {} equations", self.equations.len());
        Ok(())
    }

    /// Validate and store a new equation, optionally selecting it
    pub async fn add(&mut self, name: &str, formula: &str, select: bool) -> Result<i64> {
        let name = name.trim();
        let formula = formula.trim();
        validate_entry(name, formula)?;

        let id = self.store.insert(name, formula).await?;
        info!("Added equation {} ({})", name, id);
        self.refresh().await?;

        if select {
            self.selected = Some(id);
        }
        Ok(id)
    }

    /// Validate and rewrite an existing equation
    pub async fn update(&mut self, id: i64, name: &str, formula: &str, select: bool) -> Result<()> {
        let name = name.trim();
        let formula = formula.trim();
        validate_entry(name, formula)?;

        let mut updated = self
            .get(id)
            .cloned()
            .ok_or_else(|| SoilLinkError::Equation("equation not found".to_string()))?;
        updated.name = name.to_string();
        updated.formula = formula.to_string();

        self.store.update(&updated).await?;
        info!("Updated equation {} ({})", name, id);
        self.refresh().await?;

        if select {
            self.selected = Some(id);
        }
        Ok(())
    }

    /// Delete an equation, clearing the selection if it pointed at it
    pub async fn remove(&mut self, equation: &Equation) -> Result<()> {
        self.store.delete(equation).await?;
        info!("Removed equation {} ({})", equation.name, equation.id);
        self.refresh().await?;

        if self.selected == Some(equation.id) {
            self.selected = None;
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<&Equation> {
        self.equations.iter().find(|e| e.id == id)
    }

    pub fn select(&mut self, id: Option<i64>) {
        self.selected = id;
    }

    pub fn selected_id(&self) -> Option<i64> {
        self.selected
    }

    /// Selected equation, if it is still listed
    pub fn selected(&self) -> Option<&Equation> {
        self.selected.and_then(|id| self.get(id))
    }
}
