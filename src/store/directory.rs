//! Read-mostly directory of services, professionals, addresses and customers
//!
//! The engine only reads from the directory, apart from writing the rating
//! summaries recomputed after a completion or review.

use crate::error::{EngineError, EngineResult};
use crate::types::{
    Address, CustomerId, Professional, ProfessionalId, RatingSummary, Service, ServiceId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// User population counts used by the stats snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub customers: usize,
    pub professionals: usize,
    pub approved_professionals: usize,
}

/// Trait for directory lookups
#[async_trait]
pub trait Directory: Send + Sync {
    async fn service(&self, id: &str) -> EngineResult<Option<Service>>;

    async fn professional(&self, id: &str) -> EngineResult<Option<Professional>>;

    async fn address(&self, id: &str) -> EngineResult<Option<Address>>;

    /// Count approved professionals serving `category` at `postal_code`
    async fn count_eligible(&self, category: &str, postal_code: &str) -> EngineResult<usize>;

    async fn record_professional_rating(
        &self,
        professional_id: &str,
        summary: RatingSummary,
    ) -> EngineResult<()>;

    async fn record_service_rating(
        &self,
        service_id: &str,
        summary: RatingSummary,
    ) -> EngineResult<()>;

    async fn population(&self) -> EngineResult<Population>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    services: HashMap<ServiceId, Service>,
    professionals: HashMap<ProfessionalId, Professional>,
    addresses: HashMap<String, Address>,
    customers: HashSet<CustomerId>,
}

/// In-memory directory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_error() -> EngineError {
        EngineError::storage("Failed to acquire directory lock")
    }

    pub fn add_service(&self, service: Service) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        state.services.insert(service.id.clone(), service);
        Ok(())
    }

    /// Insert or replace a professional profile
    pub fn upsert_professional(&self, professional: Professional) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        state
            .professionals
            .insert(professional.id.clone(), professional);
        Ok(())
    }

    pub fn add_address(&self, address: Address) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        state.addresses.insert(address.id.clone(), address);
        Ok(())
    }

    pub fn add_customer(&self, customer_id: impl Into<CustomerId>) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        state.customers.insert(customer_id.into());
        Ok(())
    }

    /// Flip a professional's approval flag
    pub fn set_approval(&self, professional_id: &str, approved: bool) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        let professional = state
            .professionals
            .get_mut(professional_id)
            .ok_or_else(|| EngineError::not_found("professional", professional_id))?;
        professional.is_approved = approved;
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn service(&self, id: &str) -> EngineResult<Option<Service>> {
        let state = self.state.read().map_err(|_| Self::lock_error())?;
        Ok(state.services.get(id).cloned())
    }

    async fn professional(&self, id: &str) -> EngineResult<Option<Professional>> {
        let state = self.state.read().map_err(|_| Self::lock_error())?;
        Ok(state.professionals.get(id).cloned())
    }

    async fn address(&self, id: &str) -> EngineResult<Option<Address>> {
        let state = self.state.read().map_err(|_| Self::lock_error())?;
        Ok(state.addresses.get(id).cloned())
    }

    async fn count_eligible(&self, category: &str, postal_code: &str) -> EngineResult<usize> {
        let state = self.state.read().map_err(|_| Self::lock_error())?;
        Ok(state
            .professionals
            .values()
            .filter(|p| p.is_approved && p.category == category && p.postal_code == postal_code)
            .count())
    }

    async fn record_professional_rating(
        &self,
        professional_id: &str,
        summary: RatingSummary,
    ) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        let professional = state
            .professionals
            .get_mut(professional_id)
            .ok_or_else(|| EngineError::not_found("professional", professional_id))?;
        professional.rating = summary;
        Ok(())
    }

    async fn record_service_rating(
        &self,
        service_id: &str,
        summary: RatingSummary,
    ) -> EngineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_error())?;
        let service = state
            .services
            .get_mut(service_id)
            .ok_or_else(|| EngineError::not_found("service", service_id))?;
        service.rating = summary;
        Ok(())
    }

    async fn population(&self) -> EngineResult<Population> {
        let state = self.state.read().map_err(|_| Self::lock_error())?;
        Ok(Population {
            customers: state.customers.len(),
            professionals: state.professionals.len(),
            approved_professionals: state
                .professionals
                .values()
                .filter(|p| p.is_approved)
                .count(),
        })
    }
}
