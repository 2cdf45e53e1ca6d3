//! Partition resolved owners into approvers and stakeholders.
//!
//! Approvers own seed assets, stakeholders own related assets. The two sets
//! are disjoint and approver wins: an identity already approving is never
//! listed as a stakeholder. Within a role the first source seen is kept.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::identity::IdentityResolver;
use crate::models::{Asset, AssetRef, Identity, ImpactedPartyRecord, PartyRole};

/// What happened to a manual addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// Same id already present in the requested role; nothing changed
    AlreadyPresent,
    /// Requested stakeholder is already an approver; nothing changed
    AlreadyApprover,
    /// Requested approver was a stakeholder and has been moved over
    Promoted,
}

impl AddOutcome {
    /// User-facing warning for outcomes that changed nothing.
    pub fn warning(&self, identity: &Identity, role: PartyRole) -> Option<String> {
        match self {
            AddOutcome::AlreadyPresent => Some(format!("{} is already listed as {}", identity.name, role)),
            AddOutcome::AlreadyApprover => Some(format!(
                "{} is already an Approver and cannot also be a Stakeholder",
                identity.name
            )),
            AddOutcome::Added | AddOutcome::Promoted => None,
        }
    }
}

/// A person picked through people search for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualParty {
    pub id: u64,
    pub role: PartyRole,
}

/// Approvers and stakeholders of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImpactSet {
    approvers: Vec<ImpactedPartyRecord>,
    stakeholders: Vec<ImpactedPartyRecord>,
}

impl ImpactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approvers(&self) -> &[ImpactedPartyRecord] {
        &self.approvers
    }

    pub fn stakeholders(&self) -> &[ImpactedPartyRecord] {
        &self.stakeholders
    }

    pub fn is_approver(&self, id: u64) -> bool {
        self.approvers.iter().any(|r| r.id == id)
    }

    pub fn is_stakeholder(&self, id: u64) -> bool {
        self.stakeholders.iter().any(|r| r.id == id)
    }

    pub fn approver_ids(&self) -> Vec<u64> {
        self.approvers.iter().map(|r| r.id).collect()
    }

    pub fn stakeholder_ids(&self) -> Vec<u64> {
        self.stakeholders.iter().map(|r| r.id).collect()
    }

    /// Insert an approver unless present. Removes the id from stakeholders.
    fn upsert_approver(&mut self, record: ImpactedPartyRecord) -> bool {
        if self.is_approver(record.id) {
            return false;
        }
        self.stakeholders.retain(|r| r.id != record.id);
        self.approvers.push(record);
        true
    }

    /// Insert a stakeholder unless present in either role.
    fn upsert_stakeholder(&mut self, record: ImpactedPartyRecord) -> bool {
        if self.is_approver(record.id) || self.is_stakeholder(record.id) {
            return false;
        }
        self.stakeholders.push(record);
        true
    }

    /// Add a person picked through people search, tagged "Manually added".
    pub fn add_manual(&mut self, identity: &Identity, role: PartyRole) -> AddOutcome {
        let record = ImpactedPartyRecord::manual(identity, role);
        match role {
            PartyRole::Approver => {
                if self.is_approver(identity.id) {
                    AddOutcome::AlreadyPresent
                } else if self.is_stakeholder(identity.id) {
                    self.upsert_approver(record);
                    AddOutcome::Promoted
                } else {
                    self.upsert_approver(record);
                    AddOutcome::Added
                }
            }
            PartyRole::Stakeholder => {
                if self.is_approver(identity.id) {
                    AddOutcome::AlreadyApprover
                } else if self.is_stakeholder(identity.id) {
                    AddOutcome::AlreadyPresent
                } else {
                    self.upsert_stakeholder(record);
                    AddOutcome::Added
                }
            }
        }
    }
}

/// An asset whose owner could not be turned into an identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedOwner {
    pub asset: AssetRef,
    /// `None` when the asset has no owner reference at all
    pub owner_id: Option<u64>,
    pub role: PartyRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub parties: ImpactSet,
    pub unresolved: Vec<UnresolvedOwner>,
}

pub struct ImpactClassifier {
    resolver: Arc<IdentityResolver>,
}

impl ImpactClassifier {
    pub fn new(resolver: Arc<IdentityResolver>) -> Self {
        Self { resolver }
    }

    /// Owners of `seeds` become approvers, owners of `related` become
    /// stakeholders unless already approving. Resolution misses are reported
    /// in `unresolved`, never as errors.
    pub async fn classify(&self, seeds: &[Asset], related: &[Asset]) -> Classification {
        let mut classification = Classification::default();

        for asset in seeds {
            if let Some(identity) = self.owner_of(asset, PartyRole::Approver, &mut classification).await {
                let record = ImpactedPartyRecord::from_asset_owner(&identity, PartyRole::Approver, asset);
                classification.parties.upsert_approver(record);
            }
        }

        for asset in related {
            if let Some(identity) = self.owner_of(asset, PartyRole::Stakeholder, &mut classification).await {
                let record = ImpactedPartyRecord::from_asset_owner(&identity, PartyRole::Stakeholder, asset);
                classification.parties.upsert_stakeholder(record);
            }
        }

        log::debug!(
            "Classified {} approvers, {} stakeholders, {} unresolved owners",
            classification.parties.approvers.len(),
            classification.parties.stakeholders.len(),
            classification.unresolved.len()
        );
        classification
    }

    async fn owner_of(&self, asset: &Asset, role: PartyRole, classification: &mut Classification) -> Option<Identity> {
        let owner_id = asset.owner_id();
        let identity = match owner_id {
            Some(id) => self.resolver.resolve_owner_record(id).await,
            None => None,
        };
        if identity.is_none() {
            classification.unresolved.push(UnresolvedOwner {
                asset: asset.to_ref(),
                owner_id,
                role,
            });
        }
        identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, TtlCache};
    use crate::directory::{MockDirectory, Person};
    use crate::fetch::RateLimitedFetcher;
    use crate::models::{IdentityKind, RelationKind, RelationshipContext, MANUAL_SOURCE};

    fn person(id: u64, name: &str) -> Person {
        Person {
            id,
            first_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn owned(id: u64, name: &str, owner: Option<u64>) -> Asset {
        let mut a = Asset::new(id, name);
        a.agent_id = owner;
        a
    }

    fn identity(id: u64, name: &str) -> Identity {
        Identity {
            id,
            name: name.to_string(),
            email: None,
            departments: vec![],
            kind: IdentityKind::Agent,
        }
    }

    fn classifier(dir: MockDirectory) -> ImpactClassifier {
        let dir = Arc::new(dir);
        let cache = TtlCache::new(Arc::new(MemoryStore::new(64)));
        let fetcher = Arc::new(RateLimitedFetcher::new(dir.clone(), dir, cache));
        ImpactClassifier::new(Arc::new(IdentityResolver::new(fetcher)))
    }

    #[tokio::test]
    async fn test_approver_precedence() {
        let c = classifier(MockDirectory::new().with_agent(person(1, "U1")).with_agent(person(2, "U2")));
        let seeds = vec![owned(10, "A", Some(1)), owned(11, "B", Some(2))];
        let related = vec![owned(12, "C", Some(1))];

        let result = c.classify(&seeds, &related).await;
        let mut approvers = result.parties.approver_ids();
        approvers.sort();
        assert_eq!(approvers, vec![1, 2]);
        assert!(result.parties.stakeholders().is_empty());
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let c = classifier(MockDirectory::new().with_requester(person(1, "U1")));
        let seed = owned(10, "A", None);
        let mut first = owned(12, "first", None)
            .with_relationship(RelationshipContext::heuristic(RelationKind::SameType, &seed));
        first.user_id = Some(1);

        let result = c.classify(&[], &[first, owned(14, "later", Some(1))]).await;
        assert_eq!(result.parties.stakeholders().len(), 1);
        assert_eq!(result.parties.stakeholders()[0].source, "Owner of first (Same Type as A)");
    }

    #[tokio::test]
    async fn test_unresolved_and_ownerless_reported() {
        let c = classifier(MockDirectory::new());
        let result = c
            .classify(&[owned(10, "A", Some(77))], &[owned(11, "B", None)])
            .await;
        assert!(result.parties.approvers().is_empty());
        assert_eq!(result.unresolved.len(), 2);
        assert_eq!(result.unresolved[0].owner_id, Some(77));
        assert_eq!(result.unresolved[1].owner_id, None);
        assert_eq!(result.unresolved[1].role, PartyRole::Stakeholder);
    }

    #[tokio::test]
    async fn test_owner_field_priority() {
        let c = classifier(MockDirectory::new().with_agent(person(1, "Agent")).with_requester(person(2, "User")));
        let mut seed = owned(10, "A", Some(1));
        seed.user_id = Some(2);
        let result = c.classify(&[seed], &[]).await;
        assert_eq!(result.parties.approver_ids(), vec![1]);
    }

    #[test]
    fn test_manual_additions() {
        let mut set = ImpactSet::new();
        let ada = identity(1, "Ada");
        let bob = identity(2, "Bob");

        assert_eq!(set.add_manual(&ada, PartyRole::Approver), AddOutcome::Added);
        assert_eq!(set.add_manual(&ada, PartyRole::Approver), AddOutcome::AlreadyPresent);
        assert_eq!(set.add_manual(&ada, PartyRole::Stakeholder), AddOutcome::AlreadyApprover);
        assert_eq!(set.approvers()[0].source, MANUAL_SOURCE);

        assert_eq!(set.add_manual(&bob, PartyRole::Stakeholder), AddOutcome::Added);
        assert_eq!(set.add_manual(&bob, PartyRole::Approver), AddOutcome::Promoted);
        assert!(set.is_approver(2));
        assert!(!set.is_stakeholder(2));
    }

    #[test]
    fn test_add_outcome_warnings() {
        let ada = identity(1, "Ada");
        assert!(AddOutcome::Added.warning(&ada, PartyRole::Approver).is_none());
        assert_eq!(
            AddOutcome::AlreadyPresent.warning(&ada, PartyRole::Stakeholder).as_deref(),
            Some("Ada is already listed as Stakeholder")
        );
        assert!(AddOutcome::AlreadyApprover.warning(&ada, PartyRole::Stakeholder).is_some());
    }

    #[test]
    fn test_manual_party_parses_role() {
        let party: ManualParty = serde_json::from_str(r#"{"id": 4, "role": "stakeholder"}"#).unwrap();
        assert_eq!(party, ManualParty { id: 4, role: PartyRole::Stakeholder });
        assert!(serde_json::from_str::<ManualParty>(r#"{"id": 4, "role": "owner"}"#).is_err());
    }
}
