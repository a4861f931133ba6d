//! EIP-712 typed-data signature verification.
//!
//! Write-path operations (orders, deposits, withdrawals) are authorized by
//! typed-data signatures over the venue's domain. Verification recovers the
//! signer and compares case-insensitively against the expected address;
//! every message carries a nonce and an expiry, and expiry is checked here
//! before any recovery work.

use chrono::Utc;
use ethers::abi::Token;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use std::str::FromStr;

pub const DOMAIN_NAME: &str = "OmenMarketBackend";
pub const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE_WITH_CONTRACT: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const DOMAIN_TYPE_WITHOUT_CONTRACT: &str =
    "EIP712Domain(string name,string version,uint256 chainId)";

const ORDER_TYPE: &str = "Order(string marketId,string side,string orderKind,string quantity,string price,string nonce,uint256 expiry)";
const DEPOSIT_TYPE: &str =
    "Deposit(string userId,string tokenId,string amount,string nonce,uint256 expiry)";
const WITHDRAWAL_TYPE: &str =
    "Withdrawal(string userId,string tokenId,string amount,string nonce,uint256 expiry)";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature expiry has passed")]
    Expired,

    #[error("malformed signature or address: {0}")]
    Malformed(String),

    #[error("recovered signer does not match expected address")]
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Option<Address>,
}

impl Eip712Domain {
    pub fn for_chain(chain_id: u64, verifying_contract: Option<Address>) -> Self {
        Self {
            name: DOMAIN_NAME.to_string(),
            version: DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    fn separator(&self) -> [u8; 32] {
        let mut tokens = vec![
            Token::FixedBytes(
                keccak256(match self.verifying_contract {
                    Some(_) => DOMAIN_TYPE_WITH_CONTRACT,
                    None => DOMAIN_TYPE_WITHOUT_CONTRACT,
                })
                .to_vec(),
            ),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
        ];
        if let Some(contract) = self.verifying_contract {
            tokens.push(Token::Address(contract));
        }
        keccak256(ethers::abi::encode(&tokens))
    }
}

/// Order authorization payload. All numeric fields travel as decimal
/// strings; only `expiry` is a native uint256.
#[derive(Debug, Clone)]
pub struct OrderMessage {
    pub market_id: String,
    pub side: String,
    pub order_kind: String,
    pub quantity: String,
    pub price: String,
    pub nonce: String,
    pub expiry: u64,
}

/// Deposit and withdrawal share one field layout under distinct type names.
#[derive(Debug, Clone)]
pub struct TransferMessage {
    pub user_id: String,
    pub token_id: String,
    pub amount: String,
    pub nonce: String,
    pub expiry: u64,
}

#[derive(Debug, Clone)]
pub enum TypedMessage {
    Order(OrderMessage),
    Deposit(TransferMessage),
    Withdrawal(TransferMessage),
}

impl TypedMessage {
    pub fn expiry(&self) -> u64 {
        match self {
            TypedMessage::Order(m) => m.expiry,
            TypedMessage::Deposit(m) | TypedMessage::Withdrawal(m) => m.expiry,
        }
    }

    fn struct_hash(&self) -> [u8; 32] {
        let tokens = match self {
            TypedMessage::Order(m) => vec![
                Token::FixedBytes(keccak256(ORDER_TYPE).to_vec()),
                Token::FixedBytes(keccak256(m.market_id.as_bytes()).to_vec()),
                Token::FixedBytes(keccak256(m.side.as_bytes()).to_vec()),
                Token::FixedBytes(keccak256(m.order_kind.as_bytes()).to_vec()),
                Token::FixedBytes(keccak256(m.quantity.as_bytes()).to_vec()),
                Token::FixedBytes(keccak256(m.price.as_bytes()).to_vec()),
                Token::FixedBytes(keccak256(m.nonce.as_bytes()).to_vec()),
                Token::Uint(U256::from(m.expiry)),
            ],
            TypedMessage::Deposit(m) | TypedMessage::Withdrawal(m) => {
                let type_str = match self {
                    TypedMessage::Deposit(_) => DEPOSIT_TYPE,
                    _ => WITHDRAWAL_TYPE,
                };
                vec![
                    Token::FixedBytes(keccak256(type_str).to_vec()),
                    Token::FixedBytes(keccak256(m.user_id.as_bytes()).to_vec()),
                    Token::FixedBytes(keccak256(m.token_id.as_bytes()).to_vec()),
                    Token::FixedBytes(keccak256(m.amount.as_bytes()).to_vec()),
                    Token::FixedBytes(keccak256(m.nonce.as_bytes()).to_vec()),
                    Token::Uint(U256::from(m.expiry)),
                ]
            }
        };
        keccak256(ethers::abi::encode(&tokens))
    }
}

/// The signable digest: `keccak256(0x1901 || domainSeparator || structHash)`.
pub fn signing_digest(domain: &Eip712Domain, message: &TypedMessage) -> H256 {
    let mut buf = Vec::with_capacity(2 + 32 + 32);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(&domain.separator());
    buf.extend_from_slice(&message.struct_hash());
    H256(keccak256(buf))
}

pub struct SignatureVerifier {
    domain: Eip712Domain,
}

impl SignatureVerifier {
    pub fn new(domain: Eip712Domain) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    /// Verify a typed-data signature against the expected signer.
    pub fn verify(
        &self,
        message: &TypedMessage,
        signature: &str,
        expected_address: &str,
    ) -> Result<(), SignatureError> {
        if message.expiry() <= Utc::now().timestamp() as u64 {
            return Err(SignatureError::Expired);
        }

        let signature = Signature::from_str(signature.trim_start_matches("0x"))
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        let expected = Address::from_str(expected_address)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;

        let digest = signing_digest(&self.domain, message);
        let recovered = signature
            .recover(digest)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;

        if recovered == expected {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    fn wallet() -> LocalWallet {
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
            .parse()
            .unwrap()
    }

    fn order_message(expiry: u64) -> TypedMessage {
        TypedMessage::Order(OrderMessage {
            market_id: "market-1".to_string(),
            side: "BUY".to_string(),
            order_kind: "LIMIT".to_string(),
            quantity: "4000000000000000000".to_string(),
            price: "2000000000000000000".to_string(),
            nonce: "n-1".to_string(),
            expiry,
        })
    }

    fn future_expiry() -> u64 {
        Utc::now().timestamp() as u64 + 600
    }

    #[test]
    fn signed_order_verifies_against_signer_address() {
        let wallet = wallet();
        let verifier = SignatureVerifier::new(Eip712Domain::for_chain(23_294, None));
        let message = order_message(future_expiry());

        let digest = signing_digest(verifier.domain(), &message);
        let signature = wallet.sign_hash(digest).unwrap();

        let address = format!("{:#x}", wallet.address());
        assert!(verifier.verify(&message, &signature.to_string(), &address).is_ok());

        // Address comparison is case-insensitive.
        let upper = address.to_uppercase().replace("0X", "0x");
        assert!(verifier.verify(&message, &signature.to_string(), &upper).is_ok());
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let verifier = SignatureVerifier::new(Eip712Domain::for_chain(23_294, None));
        let message = order_message(future_expiry());
        let digest = signing_digest(verifier.domain(), &message);
        let signature = wallet().sign_hash(digest).unwrap();

        let other = "0x0000000000000000000000000000000000000001";
        assert!(matches!(
            verifier.verify(&message, &signature.to_string(), other),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn expired_message_fails_before_recovery() {
        let verifier = SignatureVerifier::new(Eip712Domain::for_chain(23_294, None));
        let message = order_message(1);
        assert!(matches!(
            verifier.verify(&message, "0xgarbage", "0x0000000000000000000000000000000000000001"),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn tampered_field_changes_digest() {
        let domain = Eip712Domain::for_chain(23_294, None);
        let original = order_message(1_999_999_999);
        let tampered = TypedMessage::Order(OrderMessage {
            quantity: "4000000000000000001".to_string(),
            ..match &original {
                TypedMessage::Order(m) => m.clone(),
                _ => unreachable!(),
            }
        });
        assert_ne!(
            signing_digest(&domain, &original),
            signing_digest(&domain, &tampered)
        );
    }

    #[test]
    fn verifying_contract_changes_domain_separator() {
        let bare = Eip712Domain::for_chain(23_294, None);
        let with_contract = Eip712Domain::for_chain(
            23_294,
            Some("0x00000000000000000000000000000000000000aa".parse().unwrap()),
        );
        let message = order_message(1_999_999_999);
        assert_ne!(
            signing_digest(&bare, &message),
            signing_digest(&with_contract, &message)
        );
    }

    #[test]
    fn deposit_and_withdrawal_domains_are_distinct() {
        let domain = Eip712Domain::for_chain(23_294, None);
        let fields = TransferMessage {
            user_id: "u1".to_string(),
            token_id: "t1".to_string(),
            amount: "100".to_string(),
            nonce: "n1".to_string(),
            expiry: 1_999_999_999,
        };
        let deposit = TypedMessage::Deposit(fields.clone());
        let withdrawal = TypedMessage::Withdrawal(fields);
        assert_ne!(
            signing_digest(&domain, &deposit),
            signing_digest(&domain, &withdrawal)
        );
    }
}
