//! Community directory
//!
//! The list of communities the local agent belongs to. A perspective is a
//! community when `ad4m://self` carries the `Community` type flag.
//!
//! Communities are shared as neighbourhoods. Joining a URL whose
//! neighbourhood is already held locally reuses that perspective.

use flux_core::predicates::{COMMUNITY, DESCRIPTION, ENTRY_TYPE, HAS_MEMBER, NAME, SELF};
use flux_core::{
    Agent, AgentClient, FluxConfig, Link, LinkAdapter, LinkQuery, Literal, PerspectiveClient,
    PerspectiveId, PerspectiveInfo,
};
use flux_query::graph;
use flux_subject::models::{self, Channel, Community};
use flux_subject::{community_sdna, subject_data, SubjectError, SubjectRepository, SubjectSchema};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::SyncError;

/// Class name the popularity rule is registered under.
const POPULARITY_CLASS: &str = "Popularity";

/// A hydrated community.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunitySummary {
    /// Perspective holding the community
    pub perspective: PerspectiveId,
    /// Neighbourhood URL when shared
    pub shared_url: Option<String>,
    /// Community metadata
    pub community: Community,
    /// Channels under `ad4m://self`
    pub channels: Vec<Channel>,
    /// Members with their public profiles; agents without one have no name
    pub members: Vec<Agent>,
}

/// Cached communities, refreshed by [`hydrate`](Self::hydrate).
pub struct CommunityDirectory {
    adapter: Arc<dyn LinkAdapter>,
    perspectives: Arc<dyn PerspectiveClient>,
    agents: Arc<dyn AgentClient>,
    config: FluxConfig,
    communities: IndexMap<PerspectiveId, CommunitySummary>,
}

impl CommunityDirectory {
    /// Empty directory.
    pub fn new(
        adapter: Arc<dyn LinkAdapter>,
        perspectives: Arc<dyn PerspectiveClient>,
        agents: Arc<dyn AgentClient>,
        config: FluxConfig,
    ) -> Self {
        Self {
            adapter,
            perspectives,
            agents,
            config,
            communities: IndexMap::new(),
        }
    }

    /// Cached communities in discovery order.
    pub fn communities(&self) -> &IndexMap<PerspectiveId, CommunitySummary> {
        &self.communities
    }

    /// One cached community.
    pub fn community(&self, perspective: &PerspectiveId) -> Option<&CommunitySummary> {
        self.communities.get(perspective)
    }

    /// Refresh the cache from the runtime.
    ///
    /// Communities whose perspective is gone are dropped. A community that
    /// fails to load keeps its previous entry.
    pub async fn hydrate(&mut self) -> Result<&IndexMap<PerspectiveId, CommunitySummary>, SyncError> {
        let me = self.agents.me().await?;
        let perspectives = self.perspectives.all().await?;

        let live: HashSet<&PerspectiveId> = perspectives.iter().map(|info| &info.uuid).collect();
        let before = self.communities.len();
        self.communities.retain(|id, _| live.contains(id));
        if self.communities.len() != before {
            tracing::info!(dropped = before - self.communities.len(), "dropped communities without a perspective");
        }

        for info in &perspectives {
            match self.load(info, &me.did).await {
                Ok(Some(summary)) => {
                    self.communities.insert(info.uuid.clone(), summary);
                }
                Ok(None) => {
                    self.communities.shift_remove(&info.uuid);
                }
                Err(e) => {
                    tracing::warn!(perspective = %info.uuid, error = %e, "community hydration failed");
                }
            }
        }
        tracing::debug!(count = self.communities.len(), "community directory hydrated");
        Ok(&self.communities)
    }

    /// Create a perspective holding a new community and cache it.
    pub async fn create_community(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<CommunitySummary, SyncError> {
        let info = self.perspectives.add(name).await?;
        let reconciler = &self.config.reconciler;
        self.adapter
            .add_sdna(
                &info.uuid,
                POPULARITY_CLASS,
                &community_sdna(&reconciler.popularity_emoji, reconciler.popularity_threshold),
            )
            .await?;
        self.repository(&info.uuid, models::community()?)
            .create(
                &subject_data([("name", name), ("description", description)]),
                Some(SELF),
                Some(SELF),
            )
            .await?;

        let me = self.agents.me().await?;
        self.adapter
            .add_link(&info.uuid, Link::new(SELF, HAS_MEMBER, me.did.clone()))
            .await?;
        let summary = self
            .load(&info, &me.did)
            .await?
            .ok_or_else(|| SyncError::from(SubjectError::not_found("Community", SELF)))?;
        self.communities.insert(info.uuid.clone(), summary.clone());
        tracing::info!(perspective = %info.uuid, name, "community created");
        Ok(summary)
    }

    /// Share a cached community as a neighbourhood carrying its name and
    /// description. Returns the neighbourhood URL.
    pub async fn publish_community(&mut self, perspective: &PerspectiveId) -> Result<String, SyncError> {
        let summary = self
            .communities
            .get_mut(perspective)
            .ok_or_else(|| SyncError::from(SubjectError::not_found("Community", SELF)))?;
        if let Some(url) = &summary.shared_url {
            return Ok(url.clone());
        }

        let mut meta = Vec::new();
        for (predicate, value) in [
            (NAME, &summary.community.name),
            (DESCRIPTION, &summary.community.description),
        ] {
            if let Some(value) = value {
                meta.push(Link::new(SELF, predicate, Literal::from_string(value.as_str()).to_url()));
            }
        }
        let url = self.perspectives.publish(perspective, meta).await?;
        summary.shared_url = Some(url.clone());
        tracing::info!(%perspective, url = %url, "community published");
        Ok(url)
    }

    /// Join the community shared at `url` and cache it.
    ///
    /// A neighbourhood the runtime already holds is not joined again.
    pub async fn join_community(&mut self, url: &str) -> Result<CommunitySummary, SyncError> {
        if let Some(summary) = self
            .communities
            .values()
            .find(|summary| summary.shared_url.as_deref() == Some(url))
        {
            tracing::debug!(url, perspective = %summary.perspective, "community already joined");
            return Ok(summary.clone());
        }

        let me = self.agents.me().await?;
        let held = self
            .perspectives
            .all()
            .await?
            .into_iter()
            .find(|info| info.shared_url.as_deref() == Some(url));
        let info = match held {
            Some(info) => info,
            None => {
                let info = self.perspectives.join(url).await?;
                self.adapter
                    .add_link(&info.uuid, Link::new(SELF, HAS_MEMBER, me.did.clone()))
                    .await?;
                tracing::info!(url, perspective = %info.uuid, "joined community");
                info
            }
        };

        let summary = self
            .load(&info, &me.did)
            .await?
            .ok_or_else(|| SyncError::from(SubjectError::not_found("Community", SELF)))?;
        self.communities.insert(info.uuid.clone(), summary.clone());
        Ok(summary)
    }

    /// Add a channel to a community and refresh its cached entry.
    pub async fn create_channel(
        &mut self,
        perspective: &PerspectiveId,
        name: &str,
    ) -> Result<Channel, SyncError> {
        let record = self
            .repository(perspective, models::channel()?)
            .create(&subject_data([("name", name)]), None, None)
            .await?;
        let channel: Channel = record.decode()?;
        if let Some(summary) = self.communities.get_mut(perspective) {
            summary.channels.push(channel.clone());
        }
        Ok(channel)
    }

    async fn load(&self, info: &PerspectiveInfo, me: &str) -> Result<Option<CommunitySummary>, SyncError> {
        let flag = LinkQuery::new()
            .source(SELF)
            .predicate(ENTRY_TYPE)
            .target(COMMUNITY)
            .limit(1);
        if self.adapter.query_links(&info.uuid, &flag).await?.is_empty() {
            return Ok(None);
        }

        let Some(record) = self
            .repository(&info.uuid, models::community()?)
            .get_data(Some(SELF))
            .await?
        else {
            return Ok(None);
        };
        let community: Community = record.decode()?;

        let channels = self
            .repository(&info.uuid, models::channel()?)
            .get_all_data(Some(SELF))
            .await?
            .iter()
            .map(|record| record.decode())
            .collect::<Result<Vec<Channel>, _>>()?;

        let mut dids = graph::targets(self.adapter.as_ref(), &info.uuid, SELF, HAS_MEMBER).await?;
        if dids.is_empty() {
            dids.push(me.to_string());
        }
        let members = self.profiles(dids).await;

        Ok(Some(CommunitySummary {
            perspective: info.uuid.clone(),
            shared_url: info.shared_url.clone(),
            community,
            channels,
            members,
        }))
    }

    /// Public profiles of `dids`, in order. Lookup failures leave the agent
    /// without a name.
    async fn profiles(&self, dids: Vec<String>) -> Vec<Agent> {
        stream::iter(dids)
            .map(|did| async move {
                match self.agents.by_did(&did).await {
                    Ok(Some(agent)) => agent,
                    Ok(None) => Agent { did, name: None },
                    Err(e) => {
                        tracing::debug!(did = %did, error = %e, "profile lookup failed");
                        Agent { did, name: None }
                    }
                }
            })
            .buffered(self.config.repository.resolve_concurrency.max(1))
            .collect()
            .await
    }

    fn repository(&self, perspective: &PerspectiveId, schema: SubjectSchema) -> SubjectRepository {
        SubjectRepository::with_config(
            self.adapter.clone(),
            perspective.clone(),
            Arc::new(schema),
            &self.config.repository,
        )
        .with_source(SELF)
    }
}

impl std::fmt::Debug for CommunityDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunityDirectory")
            .field("communities", &self.communities.len())
            .finish_non_exhaustive()
    }
}
