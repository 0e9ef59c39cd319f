//! Postgres implementation of the credential store.
//!
//! Flow Overview:
//! 1) Principals live in `users`, `partners` and `admins`; the table is picked
//!    from [`PrincipalKind`], never from caller input.
//! 2) `refresh_sessions` is keyed by `(principal_kind, principal_id)`, so the
//!    primary key itself enforces one live session per principal.
//! 3) Rotation deletes the old row only when its hash still matches. The
//!    `DELETE` takes the row lock, so of two concurrent redemptions exactly one
//!    sees an affected row and the other backs out without inserting.
//! 4) Resends take a transaction-scoped advisory lock on the code scope
//!    before counting, so the live-code and hourly checks see every
//!    concurrent insert.
//! 5) Code consumption locks the matching row `FOR UPDATE`, marks it used and
//!    flips `email_verified` before committing.

use super::{
    CodeCap, CodeStore, NewCode, OneTimeCode, PendingCode, Permission, PermissionInput, PrincipalStore,
    RbacStore, RefreshSession, Role, RoleInput, SessionStore,
};
use crate::auth::{
    error::{AuthError, AuthResult, Resource},
    otp::OtpPurpose,
    principal::{NewPrincipal, Principal, PrincipalKind, DEFAULT_USER_ROLE},
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{postgres::PgRow, PgExecutor, PgPool, Row};
use tracing::{info_span, Instrument, Span};

/// Schema applied by deployments and integration tests.
pub const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_carhub_auth.sql"
));

const PRINCIPAL_COLUMNS: &str = "p.id, p.display_name, p.email, p.phone, p.password_hash, \
     p.is_active, p.email_verified, p.last_login_at, p.created_at";

const ROLE_COLUMNS: &str = "r.id, r.name, r.display_name, r.description, r.is_default, r.is_super_admin";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if any statement of the schema fails.
    pub async fn apply_schema(&self) -> AuthResult<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(db_span("DDL", "01_carhub_auth.sql"))
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, "23505")
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, "23503")
}

fn has_sqlstate(err: &sqlx::Error, state: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == state),
        _ => false,
    }
}

fn table(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::User => "users",
        PrincipalKind::Partner => "partners",
        PrincipalKind::Admin => "admins",
    }
}

fn roles_expr(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::User => "ARRAY[p.role] AS roles",
        PrincipalKind::Partner => "ARRAY['partner']::TEXT[] AS roles",
        PrincipalKind::Admin => {
            "COALESCE((SELECT array_agg(r.name ORDER BY r.name) FROM admin_user_roles ur \
             JOIN admin_roles r ON r.id = ur.role_id WHERE ur.admin_id = p.id), \
             ARRAY[]::TEXT[]) AS roles"
        }
    }
}

fn select_principal(kind: PrincipalKind, filter: &str) -> String {
    format!(
        "SELECT {PRINCIPAL_COLUMNS}, {} FROM {} p WHERE {filter}",
        roles_expr(kind),
        table(kind)
    )
}

fn principal_from_row(kind: PrincipalKind, row: &PgRow) -> Result<Principal, sqlx::Error> {
    let password_hash: String = row.try_get("password_hash")?;
    Ok(Principal {
        id: row.try_get("id")?,
        kind,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: SecretString::from(password_hash),
        active: row.try_get("is_active")?,
        email_verified: row.try_get("email_verified")?,
        roles: row.try_get("roles")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn code_from_row(row: &PgRow) -> Result<OneTimeCode, sqlx::Error> {
    let owner_kind: String = row.try_get("owner_kind")?;
    let purpose: String = row.try_get("purpose")?;
    Ok(OneTimeCode {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        owner_kind: PrincipalKind::parse(&owner_kind).ok_or_else(|| decode_error("owner_kind"))?,
        purpose: OtpPurpose::parse(&purpose).ok_or_else(|| decode_error("purpose"))?,
        code: row.try_get("code")?,
        expires_at: row.try_get("expires_at")?,
        used: row.try_get("used")?,
        created_at: row.try_get("created_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        is_default: row.try_get("is_default")?,
        is_super_admin: row.try_get("is_super_admin")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn decode_error(column: &str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid value in column {column}"),
    )))
}

async fn insert_principal(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new: &NewPrincipal,
) -> AuthResult<i64> {
    let query = match new.kind {
        PrincipalKind::User => {
            r"
            INSERT INTO users
                (display_name, email, phone, password_hash, is_active, email_verified, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "
        }
        PrincipalKind::Partner => {
            r"
            INSERT INTO partners
                (display_name, email, phone, password_hash, is_active, email_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "
        }
        PrincipalKind::Admin => {
            r"
            INSERT INTO admins
                (display_name, email, phone, password_hash, is_active, email_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "
        }
    };
    let mut statement = sqlx::query(query)
        .bind(&new.display_name)
        .bind(&new.email)
        .bind(new.phone.as_deref())
        .bind(new.password_hash.expose_secret())
        .bind(new.active)
        .bind(new.email_verified);
    if new.kind == PrincipalKind::User {
        statement = statement.bind(new.role.as_deref().unwrap_or(DEFAULT_USER_ROLE));
    }

    match statement
        .fetch_one(&mut **tx)
        .instrument(db_span("INSERT", query))
        .await
    {
        Ok(row) => Ok(row.try_get("id")?),
        Err(err) if is_unique_violation(&err) => Err(AuthError::AlreadyExists(Resource::Principal)),
        Err(err) => Err(anyhow::Error::new(err)
            .context("failed to insert principal")
            .into()),
    }
}

async fn insert_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    code: &NewCode,
) -> AuthResult<OneTimeCode> {
    let query = r"
        INSERT INTO one_time_codes
            (owner_id, owner_kind, purpose, code, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, owner_id, owner_kind, purpose, code, expires_at, used, created_at
    ";
    let row = sqlx::query(query)
        .bind(code.owner_id)
        .bind(code.owner_kind.as_str())
        .bind(code.pending.purpose.as_str())
        .bind(&code.pending.code)
        .bind(code.pending.expires_at)
        .fetch_one(&mut **tx)
        .instrument(db_span("INSERT", query))
        .await
        .context("failed to insert one-time code")?;
    Ok(code_from_row(&row)?)
}

async fn count_live_codes<'e>(
    executor: impl PgExecutor<'e>,
    owner_id: i64,
    owner_kind: PrincipalKind,
    purpose: OtpPurpose,
    now: DateTime<Utc>,
) -> AuthResult<i64> {
    let query = r"
        SELECT COUNT(*) AS live
        FROM one_time_codes
        WHERE owner_id = $1 AND owner_kind = $2 AND purpose = $3
          AND used = FALSE AND expires_at > $4
    ";
    let row = sqlx::query(query)
        .bind(owner_id)
        .bind(owner_kind.as_str())
        .bind(purpose.as_str())
        .bind(now)
        .fetch_one(executor)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to count live codes")?;
    Ok(row.try_get("live")?)
}

async fn count_codes_since<'e>(
    executor: impl PgExecutor<'e>,
    owner_id: i64,
    owner_kind: PrincipalKind,
    purpose: OtpPurpose,
    since: DateTime<Utc>,
) -> AuthResult<i64> {
    let query = r"
        SELECT COUNT(*) AS recent
        FROM one_time_codes
        WHERE owner_id = $1 AND owner_kind = $2 AND purpose = $3 AND created_at > $4
    ";
    let row = sqlx::query(query)
        .bind(owner_id)
        .bind(owner_kind.as_str())
        .bind(purpose.as_str())
        .bind(since)
        .fetch_one(executor)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to count recent codes")?;
    Ok(row.try_get("recent")?)
}

async fn load_principal(
    pool: &PgPool,
    kind: PrincipalKind,
    id: i64,
) -> AuthResult<Principal> {
    let query = select_principal(kind, "p.id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_one(pool)
        .instrument(db_span("SELECT", &query))
        .await
        .context("failed to reload principal")?;
    Ok(principal_from_row(kind, &row)?)
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn find_by_email(
        &self,
        kind: PrincipalKind,
        email: &str,
    ) -> AuthResult<Option<Principal>> {
        let query = select_principal(kind, "p.email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup principal by email")?;
        Ok(row.map(|row| principal_from_row(kind, &row)).transpose()?)
    }

    async fn find_by_id(&self, kind: PrincipalKind, id: i64) -> AuthResult<Option<Principal>> {
        let query = select_principal(kind, "p.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup principal by id")?;
        Ok(row.map(|row| principal_from_row(kind, &row)).transpose()?)
    }

    async fn phone_taken(&self, kind: PrincipalKind, phone: &str) -> AuthResult<bool> {
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE phone = $1) AS taken",
            table(kind)
        );
        let row = sqlx::query(&query)
            .bind(phone)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to check phone")?;
        Ok(row.try_get("taken")?)
    }

    async fn create_principal(&self, new: NewPrincipal) -> AuthResult<Principal> {
        let mut tx = self.pool.begin().await.context("begin principal transaction")?;
        let id = insert_principal(&mut tx, &new).await?;
        tx.commit().await.context("commit principal transaction")?;
        load_principal(&self.pool, new.kind, id).await
    }

    async fn create_admin_with_role(&self, new: NewPrincipal, role_id: i64) -> AuthResult<Principal> {
        let mut tx = self.pool.begin().await.context("begin bootstrap transaction")?;
        let id = insert_principal(&mut tx, &new).await?;

        let query = "INSERT INTO admin_user_roles (admin_id, role_id) VALUES ($1, $2)";
        match sqlx::query(query)
            .bind(id)
            .bind(role_id)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
        {
            Ok(_) => {}
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(AuthError::NotFound(Resource::Role));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context("failed to assign bootstrap role")
                    .into());
            }
        }

        tx.commit().await.context("commit bootstrap transaction")?;
        load_principal(&self.pool, new.kind, id).await
    }

    async fn create_principal_with_code(
        &self,
        new: NewPrincipal,
        code: PendingCode,
    ) -> AuthResult<(Principal, OneTimeCode)> {
        // Principal row and first code commit together or not at all.
        let mut tx = self.pool.begin().await.context("begin signup transaction")?;
        let id = insert_principal(&mut tx, &new).await?;
        let code = insert_code(
            &mut tx,
            &NewCode {
                owner_id: id,
                owner_kind: new.kind,
                pending: code,
            },
        )
        .await?;
        tx.commit().await.context("commit signup transaction")?;
        let principal = load_principal(&self.pool, new.kind, id).await?;
        Ok((principal, code))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn find_session(
        &self,
        kind: PrincipalKind,
        principal_id: i64,
    ) -> AuthResult<Option<RefreshSession>> {
        let query = r"
            SELECT token_hash, expires_at
            FROM refresh_sessions
            WHERE principal_kind = $1 AND principal_id = $2
        ";
        let row = sqlx::query(query)
            .bind(kind.as_str())
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup refresh session")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RefreshSession {
            kind,
            principal_id,
            token_hash: row.try_get("token_hash")?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn replace_session(&self, session: RefreshSession, stamp_login: bool) -> AuthResult<()> {
        let mut tx = self.pool.begin().await.context("begin session transaction")?;

        // Of concurrent sign-ins for one principal, the last to commit wins.
        let query = r"
            INSERT INTO refresh_sessions (principal_kind, principal_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (principal_kind, principal_id) DO UPDATE
            SET token_hash = EXCLUDED.token_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = NOW()
        ";
        sqlx::query(query)
            .bind(session.kind.as_str())
            .bind(session.principal_id)
            .bind(&session.token_hash)
            .bind(session.expires_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert refresh session")?;

        if stamp_login {
            let query = format!(
                "UPDATE {} SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1",
                table(session.kind)
            );
            sqlx::query(&query)
                .bind(session.principal_id)
                .execute(&mut *tx)
                .instrument(db_span("UPDATE", &query))
                .await
                .context("failed to stamp last login")?;
        }

        tx.commit().await.context("commit session transaction")?;
        Ok(())
    }

    async fn rotate_session(&self, expected_hash: &str, next: RefreshSession) -> AuthResult<bool> {
        let mut tx = self.pool.begin().await.context("begin rotation transaction")?;

        let query = r"
            DELETE FROM refresh_sessions
            WHERE principal_kind = $1 AND principal_id = $2 AND token_hash = $3
        ";
        let deleted = sqlx::query(query)
            .bind(next.kind.as_str())
            .bind(next.principal_id)
            .bind(expected_hash)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete rotated session")?
            .rows_affected();

        if deleted != 1 {
            tx.rollback().await.context("rollback lost rotation")?;
            return Ok(false);
        }

        let query = r"
            INSERT INTO refresh_sessions (principal_kind, principal_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(next.kind.as_str())
            .bind(next.principal_id)
            .bind(&next.token_hash)
            .bind(next.expires_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert rotated session")?;

        tx.commit().await.context("commit rotation transaction")?;
        Ok(true)
    }

    async fn delete_session(&self, kind: PrincipalKind, principal_id: i64) -> AuthResult<bool> {
        let query = "DELETE FROM refresh_sessions WHERE principal_kind = $1 AND principal_id = $2";
        let result = sqlx::query(query)
            .bind(kind.as_str())
            .bind(principal_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to revoke refresh session")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CodeStore for PgStore {
    async fn insert_code(&self, code: NewCode) -> AuthResult<OneTimeCode> {
        let mut tx = self.pool.begin().await.context("begin code transaction")?;
        let record = insert_code(&mut tx, &code).await?;
        tx.commit().await.context("commit code transaction")?;
        Ok(record)
    }

    async fn insert_code_if_clear(
        &self,
        code: NewCode,
        now: DateTime<Utc>,
        cap: Option<CodeCap>,
    ) -> AuthResult<OneTimeCode> {
        let mut tx = self.pool.begin().await.context("begin resend transaction")?;

        // Serializes every resend for the scope until commit.
        let query = "SELECT pg_advisory_xact_lock(hashtext($1))";
        sqlx::query(query)
            .bind(format!(
                "one_time_codes:{}:{}:{}",
                code.owner_kind.as_str(),
                code.owner_id,
                code.pending.purpose.as_str()
            ))
            .execute(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock code scope")?;

        let (owner_id, owner_kind, purpose) = (code.owner_id, code.owner_kind, code.pending.purpose);
        if count_live_codes(&mut *tx, owner_id, owner_kind, purpose, now).await? > 0 {
            return Err(AuthError::CodeAlreadyOutstanding);
        }
        if let Some(cap) = cap {
            if count_codes_since(&mut *tx, owner_id, owner_kind, purpose, cap.since).await?
                >= cap.max
            {
                return Err(AuthError::RateLimitExceeded);
            }
        }

        let record = insert_code(&mut tx, &code).await?;
        tx.commit().await.context("commit resend transaction")?;
        Ok(record)
    }

    async fn count_live_codes(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> AuthResult<i64> {
        count_live_codes(&self.pool, owner_id, owner_kind, purpose, now).await
    }

    async fn count_codes_since(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        since: DateTime<Utc>,
    ) -> AuthResult<i64> {
        count_codes_since(&self.pool, owner_id, owner_kind, purpose, since).await
    }

    async fn consume_code(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        code: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<bool> {
        let mut tx = self.pool.begin().await.context("begin verification transaction")?;

        let query = r"
            UPDATE one_time_codes
            SET used = TRUE
            WHERE id = (
                SELECT id FROM one_time_codes
                WHERE owner_id = $1 AND owner_kind = $2 AND purpose = $3 AND code = $4
                  AND used = FALSE AND expires_at > $5
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE
            )
            RETURNING id
        ";
        let consumed = sqlx::query(query)
            .bind(owner_id)
            .bind(owner_kind.as_str())
            .bind(purpose.as_str())
            .bind(code)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to consume code")?;

        if consumed.is_none() {
            tx.rollback().await.context("rollback verification")?;
            return Ok(false);
        }

        let query = format!(
            "UPDATE {} SET email_verified = TRUE, updated_at = NOW() WHERE id = $1",
            table(owner_kind)
        );
        let updated = sqlx::query(&query)
            .bind(owner_id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to mark email verified")?
            .rows_affected();
        if updated != 1 {
            tx.rollback().await.context("rollback verification")?;
            return Err(anyhow!("code owner {owner_kind}:{owner_id} missing").into());
        }

        tx.commit().await.context("commit verification transaction")?;
        Ok(true)
    }

    async fn delete_spent_codes(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let query = "DELETE FROM one_time_codes WHERE used = TRUE OR expires_at < $1";
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete spent codes")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RbacStore for PgStore {
    async fn has_super_admin_role(&self, admin_id: i64) -> AuthResult<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1
                FROM admin_user_roles ur
                JOIN admin_roles r ON r.id = ur.role_id
                WHERE ur.admin_id = $1 AND r.is_super_admin = TRUE
            ) AS allowed
        ";
        let row = sqlx::query(query)
            .bind(admin_id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check super admin role")?;
        Ok(row.try_get("allowed")?)
    }

    async fn has_permission_via_roles(&self, admin_id: i64, permission: &str) -> AuthResult<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1
                FROM admin_user_roles ur
                JOIN admin_role_permissions rp ON rp.role_id = ur.role_id
                JOIN admin_permissions p ON p.id = rp.permission_id
                WHERE ur.admin_id = $1 AND p.name = $2
            ) AS allowed
        ";
        let row = sqlx::query(query)
            .bind(admin_id)
            .bind(permission)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check permission")?;
        Ok(row.try_get("allowed")?)
    }

    async fn find_role(&self, role_id: i64) -> AuthResult<Option<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM admin_roles r WHERE r.id = $1");
        let row = sqlx::query(&query)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup role")?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn find_role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM admin_roles r WHERE r.name = $1");
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup role by name")?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn list_roles(&self) -> AuthResult<Vec<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM admin_roles r ORDER BY r.id");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list roles")?;
        Ok(rows.iter().map(role_from_row).collect::<Result<_, _>>()?)
    }

    async fn create_role(&self, input: RoleInput) -> AuthResult<Role> {
        let query = r"
            INSERT INTO admin_roles AS r (name, display_name, description, is_default, is_super_admin)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING r.id, r.name, r.display_name, r.description, r.is_default, r.is_super_admin
        ";
        let result = sqlx::query(query)
            .bind(&input.name)
            .bind(&input.display_name)
            .bind(input.description.as_deref())
            .bind(input.is_default)
            .bind(input.is_super_admin)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;
        match result {
            Ok(row) => Ok(role_from_row(&row)?),
            Err(err) if is_unique_violation(&err) => Err(AuthError::AlreadyExists(Resource::Role)),
            Err(err) => Err(anyhow::Error::new(err).context("failed to create role").into()),
        }
    }

    async fn update_role(&self, role_id: i64, input: RoleInput) -> AuthResult<Option<Role>> {
        let query = r"
            UPDATE admin_roles AS r
            SET name = $2, display_name = $3, description = $4, is_default = $5,
                is_super_admin = $6, updated_at = NOW()
            WHERE r.id = $1
            RETURNING r.id, r.name, r.display_name, r.description, r.is_default, r.is_super_admin
        ";
        let result = sqlx::query(query)
            .bind(role_id)
            .bind(&input.name)
            .bind(&input.display_name)
            .bind(input.description.as_deref())
            .bind(input.is_default)
            .bind(input.is_super_admin)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await;
        match result {
            Ok(row) => Ok(row.as_ref().map(role_from_row).transpose()?),
            Err(err) if is_unique_violation(&err) => Err(AuthError::AlreadyExists(Resource::Role)),
            Err(err) => Err(anyhow::Error::new(err).context("failed to update role").into()),
        }
    }

    async fn delete_role(&self, role_id: i64) -> AuthResult<bool> {
        // Join rows go first so no assignment ever points at a missing role.
        let mut tx = self.pool.begin().await.context("begin role delete")?;
        for query in [
            "DELETE FROM admin_user_roles WHERE role_id = $1",
            "DELETE FROM admin_role_permissions WHERE role_id = $1",
        ] {
            sqlx::query(query)
                .bind(role_id)
                .execute(&mut *tx)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to strip role assignments")?;
        }
        let query = "DELETE FROM admin_roles WHERE id = $1";
        let deleted = sqlx::query(query)
            .bind(role_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete role")?
            .rows_affected();
        tx.commit().await.context("commit role delete")?;
        Ok(deleted > 0)
    }

    async fn find_permission(&self, permission_id: i64) -> AuthResult<Option<Permission>> {
        let query = "SELECT id, name, description FROM admin_permissions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup permission")?;
        Ok(row.as_ref().map(permission_from_row).transpose()?)
    }

    async fn find_permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>> {
        let query = "SELECT id, name, description FROM admin_permissions WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup permission by name")?;
        Ok(row.as_ref().map(permission_from_row).transpose()?)
    }

    async fn list_permissions(&self) -> AuthResult<Vec<Permission>> {
        let query = "SELECT id, name, description FROM admin_permissions ORDER BY id";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list permissions")?;
        Ok(rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn create_permission(&self, input: PermissionInput) -> AuthResult<Permission> {
        let query = r"
            INSERT INTO admin_permissions (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description
        ";
        let result = sqlx::query(query)
            .bind(&input.name)
            .bind(input.description.as_deref())
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;
        match result {
            Ok(row) => Ok(permission_from_row(&row)?),
            Err(err) if is_unique_violation(&err) => {
                Err(AuthError::AlreadyExists(Resource::Permission))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to create permission")
                .into()),
        }
    }

    async fn update_permission(
        &self,
        permission_id: i64,
        input: PermissionInput,
    ) -> AuthResult<Option<Permission>> {
        let query = r"
            UPDATE admin_permissions
            SET name = $2, description = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description
        ";
        let result = sqlx::query(query)
            .bind(permission_id)
            .bind(&input.name)
            .bind(input.description.as_deref())
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await;
        match result {
            Ok(row) => Ok(row.as_ref().map(permission_from_row).transpose()?),
            Err(err) if is_unique_violation(&err) => {
                Err(AuthError::AlreadyExists(Resource::Permission))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to update permission")
                .into()),
        }
    }

    async fn delete_permission(&self, permission_id: i64) -> AuthResult<bool> {
        let mut tx = self.pool.begin().await.context("begin permission delete")?;
        let query = "DELETE FROM admin_role_permissions WHERE permission_id = $1";
        sqlx::query(query)
            .bind(permission_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to strip permission assignments")?;
        let query = "DELETE FROM admin_permissions WHERE id = $1";
        let deleted = sqlx::query(query)
            .bind(permission_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete permission")?
            .rows_affected();
        tx.commit().await.context("commit permission delete")?;
        Ok(deleted > 0)
    }

    async fn admin_roles(&self, admin_id: i64) -> AuthResult<Vec<Role>> {
        let query = format!(
            "SELECT {ROLE_COLUMNS} FROM admin_roles r \
             JOIN admin_user_roles ur ON ur.role_id = r.id \
             WHERE ur.admin_id = $1 ORDER BY r.id"
        );
        let rows = sqlx::query(&query)
            .bind(admin_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list admin roles")?;
        Ok(rows.iter().map(role_from_row).collect::<Result<_, _>>()?)
    }

    async fn role_permissions(&self, role_id: i64) -> AuthResult<Vec<Permission>> {
        let query = r"
            SELECT p.id, p.name, p.description
            FROM admin_permissions p
            JOIN admin_role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.id
        ";
        let rows = sqlx::query(query)
            .bind(role_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list role permissions")?;
        Ok(rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn assign_role(&self, admin_id: i64, role_id: i64) -> AuthResult<bool> {
        let query = r"
            INSERT INTO admin_user_roles (admin_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
        ";
        let result = sqlx::query(query)
            .bind(admin_id)
            .bind(role_id)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to assign role")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_role(&self, admin_id: i64, role_id: i64) -> AuthResult<bool> {
        let query = "DELETE FROM admin_user_roles WHERE admin_id = $1 AND role_id = $2";
        let result = sqlx::query(query)
            .bind(admin_id)
            .bind(role_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to revoke role")?;
        Ok(result.rows_affected() > 0)
    }

    async fn assign_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<bool> {
        let query = r"
            INSERT INTO admin_role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
        ";
        let result = sqlx::query(query)
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to assign permission")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<bool> {
        let query = "DELETE FROM admin_role_permissions WHERE role_id = $1 AND permission_id = $2";
        let result = sqlx::query(query)
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to revoke permission")?;
        Ok(result.rows_affected() > 0)
    }
}
