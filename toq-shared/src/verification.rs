//! External identity checks
//!
//! CPF (with birth date), CNPJ and CEP lookups used when accounts are
//! created or addresses change. A lookup that the provider answers with
//! "not found" or "invalid" yields `Ok(None)`; only infrastructure failures
//! are errors.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::DomainError;
use crate::models::user::digits_only;

/// Verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("identity provider not configured")]
    NotConfigured,

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("identity provider http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<VerificationError> for DomainError {
    fn from(err: VerificationError) -> Self {
        DomainError::internal(err)
    }
}

/// Address returned by a CEP lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CepAddress {
    pub zip_code: String,
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

/// Identity-check port
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Canonical full name for a CPF whose birth date matches
    async fn verify_cpf(&self, cpf: &str, birth_date: NaiveDate)
        -> Result<Option<String>, VerificationError>;

    /// Registered company name for a CNPJ
    async fn verify_cnpj(&self, cnpj: &str) -> Result<Option<String>, VerificationError>;

    async fn lookup_cep(&self, cep: &str) -> Result<Option<CepAddress>, VerificationError>;
}

/// Provider settings
#[derive(Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub base_url: Option<String>,
    pub token: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for VerificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationConfig")
            .field("base_url", &self.base_url)
            .field("token", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: String::new(),
            timeout_secs: 10,
        }
    }
}

impl VerificationConfig {
    /// Reads `IDENTITY_PROVIDER_URL`, `IDENTITY_PROVIDER_TOKEN` and
    /// `IDENTITY_PROVIDER_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("IDENTITY_PROVIDER_URL").ok().filter(|v| !v.is_empty()),
            token: env::var("IDENTITY_PROVIDER_TOKEN").unwrap_or_default(),
            timeout_secs: env::var("IDENTITY_PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

/// Provider envelope shared by the three lookups
#[derive(Debug, Deserialize)]
struct ProviderResponse<T> {
    #[serde(default)]
    status: bool,
    #[serde(default, rename = "return")]
    outcome: String,
    #[serde(default)]
    message: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CpfResult {
    nome_da_pf: String,
}

#[derive(Debug, Deserialize)]
struct CnpjResult {
    razao_social: String,
}

#[derive(Debug, Deserialize)]
struct CepResult {
    cep: String,
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
}

/// JSON HTTP adapter
#[derive(Debug, Clone)]
pub struct HttpIdentityVerifier {
    http: Client,
    config: VerificationConfig,
}

impl HttpIdentityVerifier {
    pub fn new(config: VerificationConfig) -> Result<Self, VerificationError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, VerificationError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or(VerificationError::NotConfigured)?;
        let url = format!("{}/{}", base.trim_end_matches('/'), path);

        let response = self
            .http
            .get(&url)
            .query(&[("token", self.config.token.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(VerificationError::Provider(format!("provider answered {}", status)));
        }

        let body: ProviderResponse<T> = response.json().await?;
        if !body.status || !body.outcome.eq_ignore_ascii_case("OK") {
            tracing::debug!(path, message = %body.message, "Identity provider rejected lookup");
            return Ok(None);
        }
        Ok(body.result)
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify_cpf(
        &self,
        cpf: &str,
        birth_date: NaiveDate,
    ) -> Result<Option<String>, VerificationError> {
        let cpf = digits_only(cpf);
        let query = [("birthdate", birth_date.format("%d/%m/%Y").to_string())];
        let result: Option<CpfResult> = self.fetch(&format!("cpf/{}", cpf), &query).await?;
        Ok(result.map(|r| r.nome_da_pf.trim().to_string()))
    }

    async fn verify_cnpj(&self, cnpj: &str) -> Result<Option<String>, VerificationError> {
        let cnpj = digits_only(cnpj);
        let result: Option<CnpjResult> = self.fetch(&format!("cnpj/{}", cnpj), &[]).await?;
        Ok(result.map(|r| r.razao_social.trim().to_string()))
    }

    async fn lookup_cep(&self, cep: &str) -> Result<Option<CepAddress>, VerificationError> {
        let cep = digits_only(cep);
        if cep.len() != 8 {
            return Ok(None);
        }
        let result: Option<CepResult> = self.fetch(&format!("cep/{}", cep), &[]).await?;
        Ok(result.map(|r| CepAddress {
            zip_code: digits_only(&r.cep),
            street: r.logradouro,
            neighborhood: r.bairro,
            city: r.localidade,
            state: r.uf.to_ascii_uppercase(),
        }))
    }
}

/// Verifier answering from fixed tables
///
/// Used by local deployments and tests. Unknown keys yield `None`.
#[derive(Debug, Default)]
pub struct StaticIdentityVerifier {
    people: RwLock<HashMap<String, (NaiveDate, String)>>,
    companies: RwLock<HashMap<String, String>>,
    addresses: RwLock<HashMap<String, CepAddress>>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_person(self, cpf: &str, birth_date: NaiveDate, name: &str) -> Self {
        if let Ok(mut people) = self.people.write() {
            people.insert(digits_only(cpf), (birth_date, name.to_string()));
        }
        self
    }

    pub fn with_company(self, cnpj: &str, name: &str) -> Self {
        if let Ok(mut companies) = self.companies.write() {
            companies.insert(digits_only(cnpj), name.to_string());
        }
        self
    }

    pub fn with_address(self, address: CepAddress) -> Self {
        if let Ok(mut addresses) = self.addresses.write() {
            addresses.insert(digits_only(&address.zip_code), address);
        }
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify_cpf(
        &self,
        cpf: &str,
        birth_date: NaiveDate,
    ) -> Result<Option<String>, VerificationError> {
        let people = self
            .people
            .read()
            .map_err(|_| VerificationError::Provider("lock poisoned".to_string()))?;
        Ok(people
            .get(&digits_only(cpf))
            .filter(|(born, _)| *born == birth_date)
            .map(|(_, name)| name.clone()))
    }

    async fn verify_cnpj(&self, cnpj: &str) -> Result<Option<String>, VerificationError> {
        let companies = self
            .companies
            .read()
            .map_err(|_| VerificationError::Provider("lock poisoned".to_string()))?;
        Ok(companies.get(&digits_only(cnpj)).cloned())
    }

    async fn lookup_cep(&self, cep: &str) -> Result<Option<CepAddress>, VerificationError> {
        let addresses = self
            .addresses
            .read()
            .map_err(|_| VerificationError::Provider("lock poisoned".to_string()))?;
        Ok(addresses.get(&digits_only(cep)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_verifier_checks_birth_date() {
        let born = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        let verifier = StaticIdentityVerifier::new().with_person("123.456.789-09", born, "Maria Souza");

        assert_eq!(
            verifier.verify_cpf("12345678909", born).await.unwrap().as_deref(),
            Some("Maria Souza")
        );
        let other = NaiveDate::from_ymd_opt(1991, 5, 17).unwrap();
        assert!(verifier.verify_cpf("12345678909", other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_http_verifier() {
        let verifier = HttpIdentityVerifier::new(VerificationConfig::default()).unwrap();
        let err = verifier.verify_cnpj("12345678000195").await.unwrap_err();
        assert!(matches!(err, VerificationError::NotConfigured));
    }

    #[tokio::test]
    async fn test_short_cep_is_not_found() {
        let verifier = HttpIdentityVerifier::new(VerificationConfig::default()).unwrap();
        assert!(verifier.lookup_cep("0131").await.unwrap().is_none());
    }
}
