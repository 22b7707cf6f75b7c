use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Checks the gateway's checkout signature:
/// `hex(HMAC-SHA256(secret, gateway_order_id + "|" + gateway_payment_id))`.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Some(secret.as_ref().to_vec()),
        }
    }

    /// A verifier without a secret rejects every signature.
    pub fn unconfigured() -> Self {
        Self { secret: None }
    }

    fn mac(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Option<HmacSha256> {
        let secret = self.secret.as_deref().filter(|s| !s.is_empty())?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(gateway_order_id.as_bytes());
        mac.update(b"|");
        mac.update(gateway_payment_id.as_bytes());
        Some(mac)
    }

    /// Hex signature the gateway would produce for this pair.
    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Option<String> {
        self.mac(gateway_order_id, gateway_payment_id)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against the submitted hex signature.
    pub fn verify(&self, gateway_order_id: &str, gateway_payment_id: &str, signature: &str) -> bool {
        let Ok(submitted) = hex::decode(signature.trim()) else {
            return false;
        };
        self.mac(gateway_order_id, gateway_payment_id)
            .map_or(false, |mac| mac.verify_slice(&submitted).is_ok())
    }
}
