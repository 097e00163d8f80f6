use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ethers::{
    abi::{self, Token},
    signers::{LocalWallet, Signer},
    types::{Address, H256, U256},
    utils::{keccak256, to_checksum},
};

use crate::models::{
    Eip3009Authorization, ExactEvmPayload, PaymentPayload, PaymentRequirements, TokenDomain,
    X402_VERSION,
};

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const TRANSFER_WITH_AUTHORIZATION_TYPE: &[u8] = b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

// Clock skew allowance for validAfter.
const VALID_AFTER_SKEW_SECS: i64 = 600;

/// Holds the agent's identity and signs EIP-3009 transfer authorizations.
pub struct PaymentSigner {
    wallet: LocalWallet,
}

impl PaymentSigner {
    pub fn new(private_key: &str) -> Result<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("Invalid private key")?;

        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// EIP-55 checksummed address.
    pub fn checksum_address(&self) -> String {
        to_checksum(&self.wallet.address(), None)
    }

    pub fn sign_payment(
        &self,
        requirements: &PaymentRequirements,
        chain_id: u64,
    ) -> Result<PaymentPayload> {
        let now = Utc::now().timestamp();
        let valid_after = (now - VALID_AFTER_SKEW_SECS).max(0) as u64;
        let valid_before = (now as u64)
            .checked_add(requirements.max_timeout_seconds.max(60))
            .with_context(|| {
                format!("maxTimeoutSeconds {} is out of range", requirements.max_timeout_seconds)
            })?;
        let nonce = H256::from(ethers::core::rand::random::<[u8; 32]>());

        let transfer = TransferAuthorization {
            from: self.wallet.address(),
            to: parse_address(&requirements.pay_to, "payTo")?,
            value: U256::from_dec_str(&requirements.max_amount_required).map_err(|e| {
                anyhow!("Invalid maxAmountRequired {}: {:?}", requirements.max_amount_required, e)
            })?,
            valid_after: U256::from(valid_after),
            valid_before: U256::from(valid_before),
            nonce,
        };

        let domain = requirements
            .extra
            .as_ref()
            .context("Payment requirements missing EIP-712 token domain (extra.name/version)")?;
        let verifying_contract = parse_address(&requirements.asset, "asset")?;

        let digest = authorization_digest(domain, chain_id, verifying_contract, &transfer);
        let signature = self
            .wallet
            .sign_hash(digest)
            .context("Failed to sign transfer authorization")?;

        tracing::info!(
            "Signed payment of {} atomic units to {} on {}",
            requirements.max_amount_required,
            requirements.pay_to,
            requirements.network
        );

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            payload: ExactEvmPayload {
                signature: format!("0x{}", hex::encode(signature.to_vec())),
                authorization: Eip3009Authorization {
                    from: self.checksum_address(),
                    to: to_checksum(&transfer.to, None),
                    value: transfer.value.to_string(),
                    valid_after: valid_after.to_string(),
                    valid_before: valid_before.to_string(),
                    nonce: format!("{:?}", nonce),
                },
            },
        })
    }
}

fn parse_address(value: &str, field: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| anyhow!("Invalid {} address {}: {}", field, value, e))
}

#[derive(Debug, Clone)]
pub(crate) struct TransferAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: H256,
}

impl TransferAuthorization {
    fn struct_hash(&self) -> H256 {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(TRANSFER_WITH_AUTHORIZATION_TYPE).to_vec()),
            Token::Address(self.from),
            Token::Address(self.to),
            Token::Uint(self.value),
            Token::Uint(self.valid_after),
            Token::Uint(self.valid_before),
            Token::FixedBytes(self.nonce.as_bytes().to_vec()),
        ]);

        H256::from(keccak256(encoded))
    }
}

fn domain_separator(domain: &TokenDomain, chain_id: u64, verifying_contract: Address) -> H256 {
    let encoded = abi::encode(&[
        Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
        Token::FixedBytes(keccak256(domain.name.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(domain.version.as_bytes()).to_vec()),
        Token::Uint(U256::from(chain_id)),
        Token::Address(verifying_contract),
    ]);

    H256::from(keccak256(encoded))
}

/// keccak256("\x19\x01" ++ domainSeparator ++ structHash)
pub(crate) fn authorization_digest(
    domain: &TokenDomain,
    chain_id: u64,
    verifying_contract: Address,
    transfer: &TransferAuthorization,
) -> H256 {
    let mut to_sign = Vec::with_capacity(66);
    to_sign.extend_from_slice(&[0x19, 0x01]);
    to_sign.extend_from_slice(domain_separator(domain, chain_id, verifying_contract).as_bytes());
    to_sign.extend_from_slice(transfer.struct_hash().as_bytes());

    H256::from(keccak256(to_sign))
}
