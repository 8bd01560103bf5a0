//! Drives one dashboard through a [`Scenario`] on the in-memory platform.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use tutorlink_client::{
    AuthTracker, ClientConfig, DashboardController, MemoryPlatform, PlatformClient,
    RealtimeTransport, ResourceUpload,
};
use tutorlink_types::{AuthSession, Identity, Resource, ResourceId, Role, Session, UserId};

use crate::scenario::{ResourceSeed, Scenario, ScenarioError, Step};

/// What the dashboard looked like once the scenario finished.
#[derive(Debug, Serialize)]
pub struct Report {
    pub viewer: Identity,
    pub status: String,
    pub generation: u64,
    pub sessions: Vec<Session>,
    pub resources: Vec<Resource>,
    pub failures: Vec<StepFailure>,
    /// Channels still open on the platform after teardown. Should be zero.
    pub open_channels_after_teardown: usize,
}

#[derive(Debug, Serialize)]
pub struct StepFailure {
    pub step: usize,
    pub error: String,
}

pub struct Replay {
    platform: Arc<MemoryPlatform>,
    users: HashMap<String, UserId>,
    sessions: HashMap<String, Session>,
    resources: HashMap<String, ResourceId>,
    settle: Duration,
}

impl Replay {
    /// Seed a fresh platform with the scenario's people and rows.
    pub fn new(scenario: &Scenario, settle: Duration) -> Result<Self, ScenarioError> {
        let users: HashMap<String, UserId> = scenario
            .users
            .keys()
            .map(|name| (name.clone(), UserId::new()))
            .collect();
        let mut replay = Self {
            platform: Arc::new(MemoryPlatform::new()),
            users,
            sessions: HashMap::new(),
            resources: HashMap::new(),
            settle,
        };

        for seed in &scenario.sessions {
            replay.expect_role(scenario, &seed.tutor, Role::Tutor)?;
            replay.expect_role(scenario, &seed.student, Role::Student)?;
            let session = Session::new(
                replay.user(&seed.tutor)?,
                replay.user(&seed.student)?,
                seed.subject.clone(),
                seed.date,
                seed.start_time,
            )
            .with_status(seed.status);
            replay.platform.seed_session(session.clone());
            replay.sessions.insert(seed.name.clone(), session);
        }
        for seed in &scenario.resources {
            let resource = replay.build_resource(scenario, seed)?;
            replay.platform.seed_resource(resource);
        }
        debug!(
            users = replay.users.len(),
            sessions = replay.sessions.len(),
            resources = replay.resources.len(),
            "scenario seeded"
        );
        Ok(replay)
    }

    pub fn platform(&self) -> &Arc<MemoryPlatform> {
        &self.platform
    }

    /// Sign the viewer in, load the dashboard, play every step, tear down.
    pub async fn run(
        mut self,
        scenario: &Scenario,
        client: PlatformClient,
        config: ClientConfig,
    ) -> Result<Report> {
        let identity = self.sign_in(scenario, &client).await?;
        let dashboard = DashboardController::new(client, config);

        let gate = self.platform.hold_fetches();
        let (loaded, ()) = tokio::join!(dashboard.initialize(identity), async {
            self.wait_for_channels().await;
            for (i, step) in scenario.during_load.iter().enumerate() {
                if let Err(e) = self.external_step(scenario, step) {
                    warn!(step = i, "during-load step failed: {e}");
                }
            }
            tokio::time::sleep(self.settle).await;
            info!(buffered = dashboard.buffered_updates(), "releasing bulk fetch");
            gate.release();
        });
        if let Err(e) = loaded {
            warn!("dashboard did not go live: {e}");
        }

        let mut failures = Vec::new();
        for (i, step) in scenario.steps.iter().enumerate() {
            if let Err(e) = self.step(scenario, &dashboard, step).await {
                warn!(step = i, "step failed: {e:#}");
                failures.push(StepFailure {
                    step: i,
                    error: format!("{e:#}"),
                });
            }
            tokio::time::sleep(self.settle).await;
        }

        let status = dashboard.status().to_string();
        let generation = dashboard.generation().0;
        let sessions = dashboard.sessions().to_vec();
        let resources = dashboard.resources().to_vec();
        dashboard.teardown().context("teardown failed")?;

        Ok(Report {
            viewer: identity,
            status,
            generation,
            sessions,
            resources,
            failures,
            open_channels_after_teardown: self.platform.open_channels().len(),
        })
    }

    /// Sign the viewer in on the platform and follow the auth feed until the
    /// sign-in lands.
    async fn sign_in(&self, scenario: &Scenario, client: &PlatformClient) -> Result<Identity> {
        let role = scenario.role_of(&scenario.viewer)?;
        let session = AuthSession {
            user_id: self.user(&scenario.viewer)?,
            email: Some(format!("{}@example.test", scenario.viewer)),
            access_token: "replay".into(),
            user_metadata: serde_json::json!({ "role": role }),
        };
        let mut events = client.auth.auth_events();
        self.platform.sign_in(session);

        let mut auth = AuthTracker::new();
        let Some(state) = auth.next_event(&mut events).await else {
            bail!("auth feed closed before '{}' signed in", scenario.viewer);
        };
        match state.identity() {
            Some(identity) => {
                info!(viewer = %scenario.viewer, role = %identity.role, "viewer signed in");
                Ok(*identity)
            }
            None => bail!("viewer '{}' could not sign in: {state:?}", scenario.viewer),
        }
    }

    async fn wait_for_channels(&self) {
        for _ in 0..200 {
            if self.platform.open_channels().len() >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        warn!("channels did not open while loading");
    }

    /// Steps that act on the platform directly, as another party would.
    fn external_step(&mut self, scenario: &Scenario, step: &Step) -> Result<(), ScenarioError> {
        match step {
            Step::SetStatus { session, status } => {
                let updated = self.session(session)?.with_status(*status);
                self.platform.upsert_session(updated.clone());
                self.sessions.insert(session.clone(), updated);
            }
            Step::Share(seed) => {
                let resource = self.build_resource(scenario, seed)?;
                self.platform.upsert_resource(resource);
            }
            Step::ViewerSetStatus { .. } | Step::Upload { .. } | Step::Delete { .. } => {
                warn!("{step:?} needs a live dashboard, skipped during load");
            }
        }
        Ok(())
    }

    async fn step(
        &mut self,
        scenario: &Scenario,
        dashboard: &DashboardController,
        step: &Step,
    ) -> Result<()> {
        match step {
            Step::SetStatus { .. } | Step::Share(_) => self.external_step(scenario, step)?,
            Step::ViewerSetStatus { session, status } => {
                let id = self.session(session)?.id;
                let updated = dashboard.update_session_status(id, *status).await?;
                self.sessions.insert(session.clone(), updated);
            }
            Step::Upload {
                name,
                title,
                file_name,
                content_type,
                size,
                public,
            } => {
                let upload = ResourceUpload {
                    title: title.clone(),
                    description: None,
                    subject: String::new(),
                    is_public: *public,
                    student_ids: vec![],
                    file_name: file_name.clone(),
                    content_type: content_type.clone(),
                    bytes: vec![0u8; *size],
                };
                let resource = dashboard.upload_resource(upload).await?;
                self.resources.insert(name.clone(), resource.id);
            }
            Step::Delete { resource } => {
                let id = *self
                    .resources
                    .get(resource)
                    .ok_or_else(|| ScenarioError::UnknownResource(resource.clone()))?;
                dashboard.delete_resource(id).await?;
            }
        }
        Ok(())
    }

    fn build_resource(
        &mut self,
        scenario: &Scenario,
        seed: &ResourceSeed,
    ) -> Result<Resource, ScenarioError> {
        self.expect_role(scenario, &seed.tutor, Role::Tutor)?;
        let student_ids = seed
            .students
            .iter()
            .map(|name| self.user(name))
            .collect::<Result<Vec<_>, _>>()?;
        let slug = seed.name.replace(' ', "-");
        let resource = Resource {
            id: ResourceId::new(),
            tutor_id: self.user(&seed.tutor)?,
            title: seed.title.clone(),
            description: None,
            subject: String::new(),
            is_public: seed.public,
            student_ids,
            file_url: format!("memory://seed/{slug}.pdf"),
            file_name: format!("{slug}.pdf"),
            content_type: "application/pdf".into(),
            size_bytes: 0,
            created_at: Utc::now(),
        };
        self.resources.insert(seed.name.clone(), resource.id);
        Ok(resource)
    }

    fn user(&self, name: &str) -> Result<UserId, ScenarioError> {
        self.users
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownUser(name.to_string()))
    }

    fn session(&self, name: &str) -> Result<Session, ScenarioError> {
        self.sessions
            .get(name)
            .cloned()
            .ok_or_else(|| ScenarioError::UnknownSession(name.to_string()))
    }

    fn expect_role(
        &self,
        scenario: &Scenario,
        name: &str,
        expected: Role,
    ) -> Result<(), ScenarioError> {
        let actual = scenario.role_of(name)?;
        if actual != expected {
            return Err(ScenarioError::WrongRole {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}
