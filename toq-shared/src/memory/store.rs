/// In-memory identity store
///
/// Transactions work on a private copy of the committed state; commit
/// publishes the copy, rollback (or drop) discards it. Concurrent writers
/// are not merged: the last commit wins. Device tokens are not
/// transactional and live beside the snapshot state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{
    Address, AgencyInvite, AgencyRealtor, AuditRecord, DeviceToken, MediaJob, MediaJobStatus, NewUser,
    NewUserRole, Role, RoleSlug, RoleStatus, Session, User, UserAccount, UserRole, Validation,
    WrongSignin,
};
use crate::repository::{
    AgencyRepository, AuditRepository, DeviceTokenRegistry, MediaJobRepository, RepoResult,
    RepositoryError, SessionRepository, TransactionPort, UserRepository, ValidationRepository,
};

#[derive(Debug, Clone, Default)]
struct State {
    sequences: HashMap<&'static str, i64>,
    roles: Vec<Role>,
    users: BTreeMap<i64, User>,
    user_roles: BTreeMap<i64, UserRole>,
    validations: BTreeMap<i64, Validation>,
    wrong_signins: BTreeMap<i64, WrongSignin>,
    invites: BTreeMap<i64, AgencyInvite>,
    links: BTreeMap<i64, AgencyRealtor>,
    audit: Vec<AuditRecord>,
    sessions: Vec<Session>,
    media_jobs: BTreeMap<i64, MediaJob>,
}

impl State {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let id = self.sequences.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn live_user(&self, user_id: i64) -> Option<&User> {
        self.users.get(&user_id).filter(|u| !u.deleted)
    }

    fn active_role(&self, user_id: i64) -> Option<UserRole> {
        self.user_roles
            .values()
            .find(|r| r.user_id == user_id && r.is_active)
            .cloned()
    }

    /// Permanently blocked root account whose address seeds system users
    fn seed_template_user(&mut self) {
        let now = Utc::now();
        let id = self.next_id("users");
        let mut user = User::from_new(
            id,
            NewUser {
                national_id: "00000000191".to_string(),
                full_name: "TOQ Template".to_string(),
                nickname: "toq".to_string(),
                email: "template@toq.invalid".to_string(),
                phone: "+550000000001".to_string(),
                birth_date: None,
                address: Address {
                    zip_code: "01310100".to_string(),
                    street: "Avenida Paulista".to_string(),
                    number: "1000".to_string(),
                    complement: String::new(),
                    neighborhood: "Bela Vista".to_string(),
                    city: "São Paulo".to_string(),
                    state: "SP".to_string(),
                },
                password_hash: "!".to_string(),
                opt_in: false,
            },
            now,
        );
        user.permanently_blocked = true;
        self.users.insert(id, user);

        let role_id = self
            .roles
            .iter()
            .find(|r| r.slug == RoleSlug::Root)
            .map(|r| r.id)
            .unwrap_or_default();
        let binding_id = self.next_id("user_roles");
        self.user_roles.insert(
            binding_id,
            UserRole {
                id: binding_id,
                user_id: id,
                role_id,
                role_slug: RoleSlug::Root,
                is_active: true,
                status: RoleStatus::Active,
                status_reason: None,
                blocked_until: None,
                status_before_block: None,
                expires_at: None,
                created_at: now,
            },
        );
    }

    fn account(&self, user: &User) -> UserAccount {
        UserAccount {
            user: user.clone(),
            active_role: self.active_role(user.id),
        }
    }
}

/// Open transaction
#[derive(Debug)]
pub struct MemoryTx {
    state: State,
    read_only: bool,
}

impl MemoryTx {
    fn write(&mut self) -> RepoResult<&mut State> {
        if self.read_only {
            return Err(RepositoryError::ReadOnly);
        }
        Ok(&mut self.state)
    }
}

/// Store backed by process memory
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    device_tokens: Mutex<BTreeMap<(i64, Uuid), DeviceToken>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn role_name(slug: RoleSlug) -> &'static str {
    match slug {
        RoleSlug::Owner => "Proprietário",
        RoleSlug::Realtor => "Corretor",
        RoleSlug::Agency => "Imobiliária",
        RoleSlug::Root => "Root",
        RoleSlug::Photographer => "Fotógrafo",
        RoleSlug::Admin => "Administrador",
    }
}

impl MemoryStore {
    /// Empty store with the role catalog seeded
    pub fn new() -> Self {
        let mut state = State::default();
        for slug in RoleSlug::ALL {
            let id = state.next_id("roles");
            state.roles.push(Role {
                id,
                slug,
                name: role_name(slug).to_string(),
                is_system_role: slug.is_system(),
            });
        }
        state.seed_template_user();

        Self {
            state: Mutex::new(state),
            device_tokens: Mutex::new(BTreeMap::new()),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, BTreeMap<(i64, Uuid), DeviceToken>> {
        match self.device_tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Committed user row, deleted rows included
    pub fn user(&self, user_id: i64) -> Option<User> {
        self.lock().users.get(&user_id).cloned()
    }

    pub fn user_roles(&self, user_id: i64) -> Vec<UserRole> {
        self.lock()
            .user_roles
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn wrong_signin(&self, user_id: i64) -> Option<WrongSignin> {
        self.lock().wrong_signins.get(&user_id).cloned()
    }

    pub fn validation(&self, user_id: i64) -> Option<Validation> {
        self.lock().validations.get(&user_id).cloned()
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.lock().audit.clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.lock().sessions.clone()
    }

    pub fn invites(&self) -> Vec<AgencyInvite> {
        self.lock().invites.values().cloned().collect()
    }

    pub fn agency_links(&self) -> Vec<AgencyRealtor> {
        self.lock().links.values().cloned().collect()
    }

    pub fn media_job(&self, job_id: i64) -> Option<MediaJob> {
        self.lock().media_jobs.get(&job_id).cloned()
    }

    pub fn device_tokens(&self, user_id: i64) -> Vec<DeviceToken> {
        self.tokens()
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn committed_transactions(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rolled_back_transactions(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Inserts a session row as the session store would
    pub fn seed_session(
        &self,
        user_id: i64,
        device_id: Option<Uuid>,
        expired_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().sessions.push(Session {
            id,
            user_id,
            device_id,
            expired_at,
            revoked: false,
        });
        id
    }

    /// Inserts a media job as the listing domain would
    pub fn seed_media_job(
        &self,
        listing_id: i64,
        status: MediaJobStatus,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    ) -> i64 {
        let mut state = self.lock();
        let id = state.next_id("media_jobs");
        state.media_jobs.insert(
            id,
            MediaJob {
                id,
                listing_id,
                status,
                error: None,
                outputs: None,
                started_at,
                finished_at,
            },
        );
        id
    }

    /// Overwrites a device token's timestamp
    pub fn backdate_device_token(&self, user_id: i64, device_id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(token) = self.tokens().get_mut(&(user_id, device_id)) {
            token.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl TransactionPort for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> RepoResult<MemoryTx> {
        Ok(MemoryTx {
            state: self.lock().clone(),
            read_only: false,
        })
    }

    async fn begin_read_only(&self) -> RepoResult<MemoryTx> {
        Ok(MemoryTx {
            state: self.lock().clone(),
            read_only: true,
        })
    }

    async fn commit(&self, tx: MemoryTx) -> RepoResult<()> {
        if !tx.read_only {
            *self.lock() = tx.state;
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&self, _tx: MemoryTx) -> RepoResult<()> {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_role_by_slug(&self, tx: &mut MemoryTx, slug: RoleSlug) -> RepoResult<Option<Role>> {
        Ok(tx.state.roles.iter().find(|r| r.slug == slug).cloned())
    }

    async fn list_roles(&self, tx: &mut MemoryTx) -> RepoResult<Vec<Role>> {
        Ok(tx.state.roles.clone())
    }

    async fn create_user(&self, tx: &mut MemoryTx, user: NewUser) -> RepoResult<User> {
        let state = tx.write()?;
        let clash = state.users.values().any(|u| {
            !u.deleted
                && (u.national_id == user.national_id || u.email == user.email || u.phone == user.phone)
        });
        if clash {
            return Err(RepositoryError::Duplicate("user".to_string()));
        }

        let id = state.next_id("users");
        let created = User::from_new(id, user, Utc::now());
        state.users.insert(id, created.clone());
        Ok(created)
    }

    async fn update_user(&self, tx: &mut MemoryTx, user: &User) -> RepoResult<()> {
        let state = tx.write()?;
        match state.users.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(RepositoryError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn get_user_by_id(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<Option<User>> {
        Ok(tx.state.live_user(user_id).cloned())
    }

    async fn get_account_by_id(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
    ) -> RepoResult<Option<UserAccount>> {
        Ok(tx.state.live_user(user_id).map(|u| tx.state.account(u)))
    }

    async fn lock_account_by_national_id(
        &self,
        tx: &mut MemoryTx,
        national_id: &str,
    ) -> RepoResult<Option<UserAccount>> {
        Ok(tx
            .state
            .users
            .values()
            .find(|u| !u.deleted && u.national_id == national_id)
            .map(|u| tx.state.account(u)))
    }

    async fn get_user_by_phone(&self, tx: &mut MemoryTx, phone: &str) -> RepoResult<Option<User>> {
        Ok(tx
            .state
            .users
            .values()
            .find(|u| !u.deleted && u.phone == phone)
            .cloned())
    }

    async fn national_id_exists(&self, tx: &mut MemoryTx, national_id: &str) -> RepoResult<bool> {
        Ok(tx
            .state
            .users
            .values()
            .any(|u| !u.deleted && u.national_id == national_id))
    }

    async fn email_in_use(
        &self,
        tx: &mut MemoryTx,
        email: &str,
        exclude: Option<i64>,
    ) -> RepoResult<bool> {
        Ok(tx.state.users.values().any(|u| {
            !u.deleted && Some(u.id) != exclude && u.email.eq_ignore_ascii_case(email)
        }))
    }

    async fn phone_in_use(
        &self,
        tx: &mut MemoryTx,
        phone: &str,
        exclude: Option<i64>,
    ) -> RepoResult<bool> {
        Ok(tx
            .state
            .users
            .values()
            .any(|u| !u.deleted && Some(u.id) != exclude && u.phone == phone))
    }

    async fn touch_last_activity(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        if let Some(user) = tx.write()?.users.get_mut(&user_id) {
            user.last_activity_at = at;
        }
        Ok(())
    }

    async fn set_user_blocked_until(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        if let Some(user) = tx.write()?.users.get_mut(&user_id) {
            user.blocked_until = until;
        }
        Ok(())
    }

    async fn set_permanently_blocked(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
        blocked: bool,
    ) -> RepoResult<()> {
        if let Some(user) = tx.write()?.users.get_mut(&user_id) {
            user.permanently_blocked = blocked;
        }
        Ok(())
    }

    async fn list_users_with_expired_block(
        &self,
        tx: &mut MemoryTx,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<i64>> {
        let state = &tx.state;
        let mut ids: Vec<i64> = state
            .users
            .values()
            .filter(|u| !u.deleted && u.blocked_until.map(|b| b <= now).unwrap_or(false))
            .map(|u| u.id)
            .chain(
                state
                    .user_roles
                    .values()
                    .filter(|r| {
                        r.status == RoleStatus::TempBlocked
                            && r.blocked_until.map(|b| b <= now).unwrap_or(true)
                    })
                    .map(|r| r.user_id),
            )
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }

    async fn list_active_user_ids_by_role(
        &self,
        tx: &mut MemoryTx,
        slug: RoleSlug,
        after_id: i64,
        limit: i64,
    ) -> RepoResult<Vec<i64>> {
        let state = &tx.state;
        let mut ids: Vec<i64> = state
            .user_roles
            .values()
            .filter(|r| {
                r.role_slug == slug
                    && r.is_active
                    && r.status == RoleStatus::Active
                    && r.user_id > after_id
                    && state.live_user(r.user_id).is_some()
            })
            .map(|r| r.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }

    async fn create_user_role(&self, tx: &mut MemoryTx, role: NewUserRole) -> RepoResult<UserRole> {
        let state = tx.write()?;
        if state
            .user_roles
            .values()
            .any(|r| r.user_id == role.user_id && r.role_id == role.role_id)
        {
            return Err(RepositoryError::Duplicate("user role".to_string()));
        }

        let id = state.next_id("user_roles");
        let created = UserRole {
            id,
            user_id: role.user_id,
            role_id: role.role_id,
            role_slug: role.role_slug,
            is_active: role.is_active,
            status: role.status,
            status_reason: role.status_reason,
            blocked_until: None,
            status_before_block: None,
            expires_at: role.expires_at,
            created_at: Utc::now(),
        };
        state.user_roles.insert(id, created.clone());
        Ok(created)
    }

    async fn list_user_roles(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<Vec<UserRole>> {
        Ok(tx
            .state
            .user_roles
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_user_role(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
        slug: RoleSlug,
    ) -> RepoResult<Option<UserRole>> {
        Ok(tx
            .state
            .user_roles
            .values()
            .find(|r| r.user_id == user_id && r.role_slug == slug)
            .cloned())
    }

    async fn get_active_user_role(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
    ) -> RepoResult<Option<UserRole>> {
        Ok(tx.state.active_role(user_id))
    }

    async fn update_user_role(&self, tx: &mut MemoryTx, role: &UserRole) -> RepoResult<()> {
        let state = tx.write()?;
        match state.user_roles.get_mut(&role.id) {
            Some(row) => {
                row.status = role.status;
                row.status_reason = role.status_reason.clone();
                row.blocked_until = role.blocked_until;
                row.status_before_block = role.status_before_block;
                row.expires_at = role.expires_at;
                Ok(())
            }
            None => Err(RepositoryError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn deactivate_user_roles(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<u64> {
        let mut changed = 0;
        for role in tx.write()?.user_roles.values_mut() {
            if role.user_id == user_id && role.is_active {
                role.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn activate_user_role(&self, tx: &mut MemoryTx, user_role_id: i64) -> RepoResult<bool> {
        match tx.write()?.user_roles.get_mut(&user_role_id) {
            Some(role) => {
                role.is_active = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_user_role(&self, tx: &mut MemoryTx, user_role_id: i64) -> RepoResult<bool> {
        Ok(tx.write()?.user_roles.remove(&user_role_id).is_some())
    }

    async fn delete_user_roles(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<u64> {
        let state = tx.write()?;
        let before = state.user_roles.len();
        state.user_roles.retain(|_, r| r.user_id != user_id);
        Ok((before - state.user_roles.len()) as u64)
    }

    async fn count_active_roles(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<i64> {
        Ok(tx
            .state
            .user_roles
            .values()
            .filter(|r| r.user_id == user_id && r.is_active)
            .count() as i64)
    }

    async fn get_wrong_signin(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
    ) -> RepoResult<Option<WrongSignin>> {
        Ok(tx.state.wrong_signins.get(&user_id).cloned())
    }

    async fn upsert_wrong_signin(&self, tx: &mut MemoryTx, tracker: &WrongSignin) -> RepoResult<()> {
        tx.write()?.wrong_signins.insert(tracker.user_id, tracker.clone());
        Ok(())
    }

    async fn delete_wrong_signin(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<bool> {
        Ok(tx.write()?.wrong_signins.remove(&user_id).is_some())
    }
}

#[async_trait]
impl ValidationRepository for MemoryStore {
    async fn lock_validation(
        &self,
        tx: &mut MemoryTx,
        user_id: i64,
    ) -> RepoResult<Option<Validation>> {
        Ok(tx.state.validations.get(&user_id).cloned())
    }

    async fn upsert_validation(&self, tx: &mut MemoryTx, validation: &Validation) -> RepoResult<()> {
        tx.write()?.validations.insert(validation.user_id, validation.clone());
        Ok(())
    }

    async fn delete_validation(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<bool> {
        Ok(tx.write()?.validations.remove(&user_id).is_some())
    }

    async fn delete_stale_validations(
        &self,
        tx: &mut MemoryTx,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let state = tx.write()?;
        let stale: Vec<i64> = state
            .validations
            .values()
            .filter(|v| v.is_stale(now))
            .map(|v| v.user_id)
            .take(limit.max(0) as usize)
            .collect();
        for user_id in &stale {
            state.validations.remove(user_id);
        }
        Ok(stale.len() as u64)
    }
}

#[async_trait]
impl AgencyRepository for MemoryStore {
    async fn get_invite_by_phone(
        &self,
        tx: &mut MemoryTx,
        phone: &str,
    ) -> RepoResult<Option<AgencyInvite>> {
        Ok(tx.state.invites.values().find(|i| i.phone == phone).cloned())
    }

    async fn create_invite(
        &self,
        tx: &mut MemoryTx,
        agency_id: i64,
        phone: &str,
    ) -> RepoResult<AgencyInvite> {
        let state = tx.write()?;
        if state.invites.values().any(|i| i.phone == phone) {
            return Err(RepositoryError::Duplicate("invite".to_string()));
        }
        let id = state.next_id("agency_invites");
        let invite = AgencyInvite {
            id,
            agency_id,
            phone: phone.to_string(),
            created_at: Utc::now(),
        };
        state.invites.insert(id, invite.clone());
        Ok(invite)
    }

    async fn update_invite_agency(
        &self,
        tx: &mut MemoryTx,
        invite_id: i64,
        agency_id: i64,
    ) -> RepoResult<()> {
        if let Some(invite) = tx.write()?.invites.get_mut(&invite_id) {
            invite.agency_id = agency_id;
            invite.created_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_invite(&self, tx: &mut MemoryTx, invite_id: i64) -> RepoResult<bool> {
        Ok(tx.write()?.invites.remove(&invite_id).is_some())
    }

    async fn delete_invites_by_agency(&self, tx: &mut MemoryTx, agency_id: i64) -> RepoResult<u64> {
        let state = tx.write()?;
        let before = state.invites.len();
        state.invites.retain(|_, i| i.agency_id != agency_id);
        Ok((before - state.invites.len()) as u64)
    }

    async fn get_agency_link_by_realtor(
        &self,
        tx: &mut MemoryTx,
        realtor_id: i64,
    ) -> RepoResult<Option<AgencyRealtor>> {
        Ok(tx
            .state
            .links
            .values()
            .find(|l| l.realtor_id == realtor_id)
            .cloned())
    }

    async fn create_agency_link(
        &self,
        tx: &mut MemoryTx,
        agency_id: i64,
        realtor_id: i64,
    ) -> RepoResult<AgencyRealtor> {
        let state = tx.write()?;
        if state.links.values().any(|l| l.realtor_id == realtor_id) {
            return Err(RepositoryError::Duplicate("agency link".to_string()));
        }
        let id = state.next_id("realtor_agency");
        let link = AgencyRealtor {
            id,
            agency_id,
            realtor_id,
            created_at: Utc::now(),
        };
        state.links.insert(id, link.clone());
        Ok(link)
    }

    async fn delete_agency_link_by_realtor(
        &self,
        tx: &mut MemoryTx,
        realtor_id: i64,
    ) -> RepoResult<bool> {
        let state = tx.write()?;
        let before = state.links.len();
        state.links.retain(|_, l| l.realtor_id != realtor_id);
        Ok(state.links.len() < before)
    }

    async fn list_realtor_ids_by_agency(
        &self,
        tx: &mut MemoryTx,
        agency_id: i64,
    ) -> RepoResult<Vec<i64>> {
        Ok(tx
            .state
            .links
            .values()
            .filter(|l| l.agency_id == agency_id)
            .map(|l| l.realtor_id)
            .collect())
    }

    async fn delete_agency_links_by_agency(
        &self,
        tx: &mut MemoryTx,
        agency_id: i64,
    ) -> RepoResult<u64> {
        let state = tx.write()?;
        let before = state.links.len();
        state.links.retain(|_, l| l.agency_id != agency_id);
        Ok((before - state.links.len()) as u64)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn insert_audit(&self, tx: &mut MemoryTx, record: &AuditRecord) -> RepoResult<()> {
        tx.write()?.audit.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn revoke_sessions_by_user(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<u64> {
        let mut revoked = 0;
        for session in tx.write()?.sessions.iter_mut() {
            if session.user_id == user_id && !session.revoked {
                session.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_sessions_by_user(&self, tx: &mut MemoryTx, user_id: i64) -> RepoResult<u64> {
        let state = tx.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|s| s.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(
        &self,
        tx: &mut MemoryTx,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let state = tx.write()?;
        let mut budget = limit.max(0) as usize;
        let before = state.sessions.len();
        state.sessions.retain(|s| {
            if budget > 0 && s.expired_at <= cutoff {
                budget -= 1;
                false
            } else {
                true
            }
        });
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl MediaJobRepository for MemoryStore {
    async fn get_media_job(&self, tx: &mut MemoryTx, job_id: i64) -> RepoResult<Option<MediaJob>> {
        Ok(tx.state.media_jobs.get(&job_id).cloned())
    }

    async fn update_media_job(&self, tx: &mut MemoryTx, job: &MediaJob) -> RepoResult<()> {
        let state = tx.write()?;
        match state.media_jobs.get_mut(&job.id) {
            Some(row) => {
                *row = job.clone();
                Ok(())
            }
            None => Err(RepositoryError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn fail_stuck_media_jobs(
        &self,
        tx: &mut MemoryTx,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let now = Utc::now();
        let mut failed = 0u64;
        for job in tx.write()?.media_jobs.values_mut() {
            if failed as i64 >= limit {
                break;
            }
            if !job.status.is_terminal() && job.started_at < started_before {
                job.status = MediaJobStatus::Failed;
                job.error = Some("processing timed out".to_string());
                job.finished_at = Some(now);
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn delete_terminal_media_jobs(
        &self,
        tx: &mut MemoryTx,
        finished_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<u64> {
        let state = tx.write()?;
        let doomed: Vec<i64> = state
            .media_jobs
            .values()
            .filter(|j| {
                j.status.is_terminal() && j.finished_at.map(|f| f < finished_before).unwrap_or(false)
            })
            .map(|j| j.id)
            .take(limit.max(0) as usize)
            .collect();
        for id in &doomed {
            state.media_jobs.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl DeviceTokenRegistry for MemoryStore {
    async fn upsert(
        &self,
        user_id: i64,
        device_id: Uuid,
        push_token: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.tokens().insert(
            (user_id, device_id),
            DeviceToken {
                user_id,
                device_id,
                push_token: push_token.to_string(),
                updated_at,
            },
        );
        Ok(())
    }

    async fn remove_all_by_user(&self, user_id: i64) -> Result<u64, DomainError> {
        let mut tokens = self.tokens();
        let before = tokens.len();
        tokens.retain(|(owner, _), _| *owner != user_id);
        Ok((before - tokens.len()) as u64)
    }

    async fn remove_by_device(&self, user_id: i64, device_id: Uuid) -> Result<u64, DomainError> {
        Ok(self.tokens().remove(&(user_id, device_id)).map(|_| 1).unwrap_or(0))
    }

    async fn list_tokens_by_user_if_opted_in(
        &self,
        user_id: i64,
    ) -> Result<Vec<DeviceToken>, DomainError> {
        let opted_in = self.lock().live_user(user_id).map(|u| u.opt_in).unwrap_or(false);
        if !opted_in {
            return Ok(Vec::new());
        }
        Ok(self.device_tokens(user_id))
    }

    async fn list_tokens_by_opted_in_users(&self) -> Result<Vec<DeviceToken>, DomainError> {
        let state = self.lock();
        Ok(self
            .tokens()
            .values()
            .filter(|t| state.live_user(t.user_id).map(|u| u.opt_in).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, DomainError> {
        let mut tokens = self.tokens();
        let doomed: Vec<(i64, Uuid)> = tokens
            .iter()
            .filter(|(_, t)| t.updated_at < cutoff)
            .map(|(key, _)| *key)
            .take(limit.max(0) as usize)
            .collect();
        for key in &doomed {
            tokens.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;

    fn new_user(national_id: &str, email: &str, phone: &str) -> NewUser {
        NewUser {
            national_id: national_id.to_string(),
            full_name: "Test User".to_string(),
            nickname: "Test".to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            birth_date: None,
            address: Address::default(),
            password_hash: String::new(),
            opt_in: true,
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = store
            .create_user(&mut tx, new_user("1", "a@b.com", "+551"))
            .await
            .unwrap();
        store.rollback(tx).await.unwrap();

        assert!(store.user(user.id).is_none());
        assert_eq!(store.rolled_back_transactions(), 1);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = store
            .create_user(&mut tx, new_user("1", "a@b.com", "+551"))
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        assert_eq!(store.user(user.id).unwrap().email, "a@b.com");
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin_read_only().await.unwrap();
        let err = store
            .create_user(&mut tx, new_user("1", "a@b.com", "+551"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ReadOnly));
    }

    #[tokio::test]
    async fn test_unique_user_fields() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        store
            .create_user(&mut tx, new_user("1", "a@b.com", "+551"))
            .await
            .unwrap();
        let err = store
            .create_user(&mut tx, new_user("2", "a@b.com", "+552"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_opt_in_gates_token_listing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut user = store
            .create_user(&mut tx, new_user("1", "a@b.com", "+551"))
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        let device = Uuid::new_v4();
        store.upsert(user.id, device, "tok-1", Utc::now()).await.unwrap();
        store.upsert(user.id, device, "tok-2", Utc::now()).await.unwrap();
        let tokens = store.list_tokens_by_user_if_opted_in(user.id).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].push_token, "tok-2");

        let mut tx = store.begin().await.unwrap();
        user.opt_in = false;
        store.update_user(&mut tx, &user).await.unwrap();
        store.commit(tx).await.unwrap();
        assert!(store.list_tokens_by_user_if_opted_in(user.id).await.unwrap().is_empty());
        assert!(store.list_tokens_by_opted_in_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_sessions_respect_limit() {
        let store = MemoryStore::new();
        let past = Utc::now() - chrono::Duration::days(2);
        for _ in 0..3 {
            store.seed_session(1, None, past);
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(store.delete_expired_sessions(&mut tx, Utc::now(), 2).await.unwrap(), 2);
        store.commit(tx).await.unwrap();
        assert_eq!(store.sessions().len(), 1);
    }
}
