//! Multi-force dispatch planning.
//!
//! Derives every force an incident needs, opens one dispatch per force,
//! assigns the best ranked vehicle and agent to new dispatches, and
//! persists the route set atomically.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use siren_proto::{ForceKind, RoutePlanner, TriageOutcome};

use crate::adjuster::RouteAdjuster;
use crate::config::RoutingConfig;
use crate::error::Result;
use crate::model::{
    CalculatedRoute, Dispatch, DispatchStatus, Incident, ResourceRef, RouteStatus,
};
use crate::selector::{RankedCandidate, ResourceSelector};
use crate::store::{NewDispatch, NewRoute, PlanCommit, Store};
use crate::triage::normalize;

/// Primary-force precedence when summarising multi-force dispatches.
const SUMMARY_PRECEDENCE: [ForceKind; 4] = [
    ForceKind::Fire,
    ForceKind::Medical,
    ForceKind::Police,
    ForceKind::Traffic,
];

const FIRE_KEYWORDS: &[&str] = &[
    "incendio", "fuego", "humo", "llamas", "se quema", "se está quemando", "se esta quemando",
    "explosión", "explosion", "derrumbe",
];
const COLLISION_KEYWORDS: &[&str] = &["choque", "accidente", "colisión", "colision", "atropell"];
const MEDICAL_KEYWORDS: &[&str] = &[
    "herido", "médico", "medico", "salud", "infarto", "inconsciente", "convulsión", "convulsion",
    "asfixia", "ahogo", "hemorragia", "atragant", "atrapad", "fractura", "intoxicac",
];
const SECURITY_KEYWORDS: &[&str] = &[
    "robo", "robando", "roban", "crimen", "disturbio", "corte", "bloqueo", "manifestación",
    "manifestacion", "asalto", "atraco", "rehen", "tiroteo", "arma",
];

/// Result of a planning pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanSummary {
    pub incident: Incident,
    pub dispatches: Vec<Dispatch>,
    /// Active routes after the rewrite, ordered by
    /// `(priority_score, distance_km)`.
    pub routes: Vec<CalculatedRoute>,
    /// True when the incident was already resolved and the stored routes
    /// were returned untouched.
    pub frozen: bool,
}

pub struct DispatchPlanner {
    store: Arc<Store>,
    selector: ResourceSelector,
    max_results: usize,
}

impl DispatchPlanner {
    pub fn new(store: Arc<Store>, config: &RoutingConfig) -> Self {
        Self {
            selector: ResourceSelector::new(Arc::clone(&store), config),
            store,
            max_results: config.max_results,
        }
    }

    /// Forces required by an incident: the triage primary force OR-ed with
    /// keyword rules over the description. Police when nothing matches.
    pub fn required_forces(description: &str, outcome: &TriageOutcome) -> BTreeSet<ForceKind> {
        let text = normalize(description);
        let mut forces = BTreeSet::new();
        forces.insert(outcome.kind);

        if FIRE_KEYWORDS.iter().any(|k| text.contains(k)) {
            forces.insert(ForceKind::Fire);
        }
        if COLLISION_KEYWORDS.iter().any(|k| text.contains(k)) {
            forces.insert(ForceKind::Police);
            forces.insert(ForceKind::Traffic);
            forces.insert(ForceKind::Medical);
        }
        if MEDICAL_KEYWORDS.iter().any(|k| text.contains(k)) {
            forces.insert(ForceKind::Medical);
        }
        if SECURITY_KEYWORDS.iter().any(|k| text.contains(k)) {
            forces.insert(ForceKind::Police);
        }

        if forces.is_empty() {
            forces.insert(ForceKind::Police);
        }
        forces
    }

    /// Runs a full (re-)plan for a classified incident.
    ///
    /// A resolved incident never replans: the frozen route set is returned
    /// as-is. Otherwise the selector ranks every required force, new
    /// dispatches take the top available vehicle and agent, and the active
    /// route set is rewritten in one transaction.
    pub async fn plan(
        &self,
        incident: &Incident,
        outcome: &TriageOutcome,
        router: &dyn RoutePlanner,
        adjuster: &RouteAdjuster,
        now: DateTime<Utc>,
        mut degradations: Vec<String>,
    ) -> Result<PlanSummary> {
        if incident.is_resolved() {
            debug!(incident = %incident.id, "plan requested on resolved incident, returning frozen routes");
            return Ok(PlanSummary {
                incident: incident.clone(),
                dispatches: self.store.dispatches_for_incident(incident.id)?,
                routes: self.store.routes_for_incident(incident.id, None)?,
                frozen: true,
            });
        }

        let required = Self::required_forces(&incident.description, outcome);
        let existing = self.store.dispatches_for_incident(incident.id)?;
        let existing_forces: BTreeSet<ForceKind> = existing.iter().map(|d| d.force).collect();

        // The lead force must be known while ranking, not only after the
        // commit: on a first plan `assigned_force` is still empty, so
        // resolve it provisionally from the same precedence the summary
        // uses over the forces that will hold a dispatch.
        let primary_force = incident.assigned_force.or_else(|| {
            let mut dispatch_forces = required.clone();
            dispatch_forces.extend(existing_forces.iter().copied());
            SUMMARY_PRECEDENCE
                .into_iter()
                .find(|f| dispatch_forces.contains(f))
        });

        let mut commit = PlanCommit::default();
        let mut dispatched_routes: Vec<NewRoute> = Vec::new();
        let mut alternative_routes: Vec<NewRoute> = Vec::new();
        let mut new_dispatch_forces: Vec<(ForceKind, Option<crate::model::VehicleId>)> = Vec::new();
        let mut used_fallback = false;

        for force in &required {
            let ranked = self
                .selector
                .rank(incident, *force, primary_force, router, adjuster, now)
                .await?;
            used_fallback |= ranked
                .vehicles
                .iter()
                .chain(ranked.agents.iter())
                .any(|c| matches!(c.route.provider.as_str(), "fallback" | "detour"));

            let mut taken: BTreeSet<String> = BTreeSet::new();
            if !existing_forces.contains(force) {
                let vehicle = ranked.top_available_vehicle().cloned();
                let agent = ranked.top_available_agent().cloned();

                if let Some(candidate) = &vehicle {
                    if let ResourceRef::Vehicle(id) = candidate.resource {
                        let target = incident.location.unwrap_or(candidate.location);
                        commit.dispatch_vehicles.push((id, target));
                        taken.insert(candidate.resource.resource_id());
                        dispatched_routes.push(new_route(candidate));
                    }
                }
                if let Some(candidate) = &agent {
                    if let ResourceRef::Agent(id) = candidate.resource {
                        let target = incident.location.unwrap_or(candidate.location);
                        commit.dispatch_agents.push((id, target));
                        taken.insert(candidate.resource.resource_id());
                        dispatched_routes.push(new_route(candidate));
                    }
                }

                let vehicle_id = vehicle.as_ref().and_then(|c| match c.resource {
                    ResourceRef::Vehicle(id) => Some(id),
                    ResourceRef::Agent(_) => None,
                });
                let agent_id = agent.as_ref().and_then(|c| match c.resource {
                    ResourceRef::Agent(id) => Some(id),
                    ResourceRef::Vehicle(_) => None,
                });
                let has_resource = vehicle_id.is_some() || agent_id.is_some();
                commit.new_dispatches.push(NewDispatch {
                    force: *force,
                    vehicle: vehicle_id,
                    agent: agent_id,
                    status: if has_resource {
                        DispatchStatus::EnRoute
                    } else {
                        DispatchStatus::Dispatched
                    },
                });
                new_dispatch_forces.push((*force, vehicle_id));
            }

            // Alternatives beyond the dispatched resources, for the
            // operator's ranked view.
            for candidate in ranked.vehicles.iter().chain(ranked.agents.iter()) {
                if !taken.contains(&candidate.resource.resource_id()) {
                    alternative_routes.push(new_route(candidate));
                }
            }
        }

        alternative_routes.sort_by(|a, b| {
            (a.priority_score, a.distance_km)
                .partial_cmp(&(b.priority_score, b.distance_km))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        alternative_routes.truncate(self.max_results);
        commit.routes = dispatched_routes;
        commit.routes.extend(alternative_routes);

        // Primary summary: commit the provisionally resolved lead force so
        // it always matches the one the selector ranked against, copying
        // the vehicle from that force's dispatch.
        if incident.assigned_force.is_none() {
            if let Some(primary) = primary_force {
                let mut all_forces: Vec<(ForceKind, Option<crate::model::VehicleId>)> = existing
                    .iter()
                    .map(|d| (d.force, d.vehicle))
                    .collect();
                all_forces.extend(new_dispatch_forces.iter().copied());
                if let Some((_, vehicle)) = all_forces.iter().find(|(f, _)| *f == primary) {
                    commit.assigned_force = Some(primary);
                    commit.assigned_vehicle = *vehicle;
                }
            }
        }

        // The incident becomes assigned once any dispatch carries a
        // resource.
        let any_resource = existing.iter().any(Dispatch::has_resource)
            || commit
                .new_dispatches
                .iter()
                .any(|d| d.vehicle.is_some() || d.agent.is_some());
        commit.mark_assigned = any_resource;

        if used_fallback {
            degradations.push("routing used fallback geometry".to_string());
        }
        if !degradations.is_empty() {
            commit.note = Some(degradations.join("\n"));
        }

        let routes = self.store.commit_plan(incident.id, commit, now)?;
        let incident = self.store.incident(incident.id)?;
        let dispatches = self.store.dispatches_for_incident(incident.id)?;
        info!(
            incident = %incident.id,
            forces = required.len(),
            dispatches = dispatches.len(),
            routes = routes.len(),
            "plan committed"
        );
        Ok(PlanSummary {
            incident,
            dispatches,
            routes,
            frozen: false,
        })
    }

    /// Stored routes for the incident, active first, planner ordering.
    pub fn stored_routes(&self, incident: &Incident) -> Result<Vec<CalculatedRoute>> {
        let mut routes = self
            .store
            .routes_for_incident(incident.id, Some(RouteStatus::Active))?;
        if routes.is_empty() {
            routes = self.store.routes_for_incident(incident.id, None)?;
        }
        Ok(routes)
    }
}

fn new_route(candidate: &RankedCandidate) -> NewRoute {
    NewRoute {
        resource_id: candidate.resource.resource_id(),
        resource_label: candidate.label.clone(),
        distance_km: candidate.distance_km,
        estimated_time_minutes: candidate.eta_minutes,
        priority_score: candidate.score,
        geometry: candidate.route.geometry.clone(),
    }
}
