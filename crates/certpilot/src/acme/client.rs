//! [`AuthorityClient`] on top of `instant-acme`

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, Authorization, ChallengeType, Identifier as AcmeIdentifier, NewOrder, Order,
    OrderStatus,
};
use tracing::{debug, info, trace, warn};

use certpilot_common::{AuthorizationStatus, ChallengeKind, Identifier};

use super::authority::{AuthorityClient, AuthorizationState, CertificateResponse, ChallengeDetails};
use crate::error::AuthorityError;

/// Attempts while waiting for the order to become ready or for the certificate
const ORDER_POLL_ATTEMPTS: u32 = 30;
const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// RFC 8555 authority client
pub struct AcmeAuthority {
    base_uri: String,
    account: Account,
    order: Option<Order>,
    http: reqwest::Client,
}

impl AcmeAuthority {
    pub fn new(base_uri: impl Into<String>, account: Account) -> Self {
        Self {
            base_uri: base_uri.into(),
            account,
            order: None,
            http: reqwest::Client::new(),
        }
    }

    fn order_mut(&mut self) -> Result<&mut Order, AuthorityError> {
        self.order.as_mut().ok_or(AuthorityError::NoOrder)
    }

    async fn find_authorization(
        &mut self,
        identifier: &Identifier,
    ) -> Result<Authorization, AuthorityError> {
        let order = self.order_mut()?;
        let authorizations = order.authorizations().await?;
        authorizations
            .into_iter()
            .find(|auth| matches_identifier(&auth.identifier, identifier))
            .ok_or_else(|| AuthorityError::UnknownIdentifier(identifier.to_string()))
    }

    /// Wait for the order to reach `wanted` or a terminal status
    async fn wait_for_order(&mut self, wanted: OrderStatus) -> Result<OrderStatus, AuthorityError> {
        let order = self.order_mut()?;
        for attempt in 1..=ORDER_POLL_ATTEMPTS {
            let state = order.refresh().await?;
            trace!(attempt, status = ?state.status, "Order status");
            if state.status == wanted
                || matches!(state.status, OrderStatus::Invalid | OrderStatus::Valid)
            {
                return Ok(state.status);
            }
            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
        }
        Ok(order.state().status)
    }
}

fn matches_identifier(acme: &AcmeIdentifier, identifier: &Identifier) -> bool {
    #[allow(unreachable_patterns)]
    match acme {
        AcmeIdentifier::Dns(name) => name.eq_ignore_ascii_case(identifier.as_str()),
        _ => false,
    }
}

fn acme_challenge_type(kind: ChallengeKind) -> ChallengeType {
    match kind {
        ChallengeKind::Http01 => ChallengeType::Http01,
        ChallengeKind::Dns01 => ChallengeType::Dns01,
    }
}

fn map_status(status: &instant_acme::AuthorizationStatus) -> AuthorizationStatus {
    match status {
        instant_acme::AuthorizationStatus::Pending => AuthorizationStatus::Pending,
        instant_acme::AuthorizationStatus::Valid => AuthorizationStatus::Valid,
        _ => AuthorizationStatus::Invalid,
    }
}

/// Split a PEM chain into DER blocks
fn pem_chain_to_der(chain: &str) -> Result<Vec<Vec<u8>>, AuthorityError> {
    let blocks = pem::parse_many(chain)
        .map_err(|e| AuthorityError::Protocol(format!("malformed certificate chain: {}", e)))?;
    Ok(blocks
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| p.into_contents())
        .collect())
}

#[async_trait]
impl AuthorityClient for AcmeAuthority {
    fn base_uri(&self) -> &str {
        &self.base_uri
    }

    async fn begin_order(&mut self, identifiers: &[Identifier]) -> Result<(), AuthorityError> {
        let acme_ids: Vec<AcmeIdentifier> = identifiers
            .iter()
            .map(|id| AcmeIdentifier::Dns(id.to_string()))
            .collect();
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &acme_ids,
            })
            .await?;
        info!(
            identifiers = identifiers.len(),
            status = ?order.state().status,
            "Created order"
        );
        self.order = Some(order);
        Ok(())
    }

    async fn authorize(
        &mut self,
        identifier: &Identifier,
        kind: ChallengeKind,
    ) -> Result<AuthorizationState, AuthorityError> {
        let authorization = self.find_authorization(identifier).await?;
        let status = map_status(&authorization.status);
        debug!(identifier = %identifier, status = %status, "Fetched authorization");

        if status != AuthorizationStatus::Pending {
            return Ok(AuthorizationState {
                identifier: identifier.clone(),
                status,
                challenge: None,
            });
        }

        let wanted = acme_challenge_type(kind);
        let challenge = authorization
            .challenges
            .iter()
            .find(|c| c.r#type == wanted)
            .ok_or_else(|| AuthorityError::NoChallenge {
                identifier: identifier.to_string(),
                kind,
            })?;

        let order = self.order_mut()?;
        let key_authorization = order.key_authorization(challenge);
        let proof_value = match kind {
            ChallengeKind::Http01 => key_authorization.as_str().to_string(),
            ChallengeKind::Dns01 => key_authorization.dns_value(),
        };

        Ok(AuthorizationState {
            identifier: identifier.clone(),
            status,
            challenge: Some(ChallengeDetails {
                kind,
                token: challenge.token.clone(),
                proof_value,
                url: challenge.url.clone(),
            }),
        })
    }

    async fn submit_challenge_answer(
        &mut self,
        state: &AuthorizationState,
    ) -> Result<(), AuthorityError> {
        let Some(ref challenge) = state.challenge else {
            return Ok(());
        };
        let order = self.order_mut()?;
        order.set_challenge_ready(&challenge.url).await?;
        debug!(identifier = %state.identifier, "Submitted challenge answer");
        Ok(())
    }

    async fn refresh_authorization(
        &mut self,
        state: &AuthorizationState,
    ) -> Result<AuthorizationState, AuthorityError> {
        let authorization = self.find_authorization(&state.identifier).await?;
        Ok(AuthorizationState {
            identifier: state.identifier.clone(),
            status: map_status(&authorization.status),
            challenge: state.challenge.clone(),
        })
    }

    async fn request_certificate(
        &mut self,
        csr_der: &[u8],
    ) -> Result<CertificateResponse, AuthorityError> {
        let status = self.wait_for_order(OrderStatus::Ready).await?;
        if status != OrderStatus::Ready {
            let order = self.order_mut()?;
            let problem = order.state().error.as_ref().map(|p| {
                p.detail
                    .clone()
                    .or_else(|| p.r#type.clone())
                    .unwrap_or_else(|| "order failed".to_string())
            });
            warn!(status = ?status, problem = ?problem, "Order is not ready for finalization");
            return Ok(CertificateResponse {
                status: 403,
                problem: Some(problem.unwrap_or_else(|| format!("order status {:?}", status))),
                ..Default::default()
            });
        }

        let order = self.order_mut()?;
        if let Err(err) = order.finalize(csr_der).await {
            return match err {
                instant_acme::Error::Api(problem) => Ok(CertificateResponse {
                    status: problem.status.unwrap_or(400),
                    problem: problem.detail.or(problem.r#type),
                    ..Default::default()
                }),
                other => Err(other.into()),
            };
        }

        let mut chain_pem = None;
        for _ in 0..ORDER_POLL_ATTEMPTS {
            if let Some(pem) = order.certificate().await? {
                chain_pem = Some(pem);
                break;
            }
            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
        }
        let Some(chain_pem) = chain_pem else {
            return Ok(CertificateResponse {
                status: 504,
                problem: Some("certificate was not issued in time".to_string()),
                ..Default::default()
            });
        };

        let mut blocks = pem_chain_to_der(&chain_pem)?.into_iter();
        let certificate = blocks
            .next()
            .ok_or_else(|| AuthorityError::Protocol("empty certificate chain".to_string()))?;
        let chain: Vec<Vec<u8>> = blocks.collect();
        info!(chain_len = chain.len(), "Downloaded certificate");

        Ok(CertificateResponse {
            status: 200,
            certificate,
            chain,
            chain_link: None,
            problem: None,
        })
    }

    async fn download_issuer_certificate(&mut self, link: &str) -> Result<Vec<u8>, AuthorityError> {
        debug!(link = %link, "Downloading issuer certificate");
        let response = self
            .http
            .get(link)
            .header(reqwest::header::ACCEPT, "application/pkix-cert")
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        // Some issuers serve PEM instead of DER
        if body.starts_with(b"-----BEGIN") {
            let text = String::from_utf8_lossy(&body);
            return pem_chain_to_der(&text)?
                .into_iter()
                .next()
                .ok_or_else(|| AuthorityError::Protocol("empty issuer certificate".to_string()));
        }
        Ok(body.to_vec())
    }
}
