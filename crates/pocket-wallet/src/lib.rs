//! # pocket-wallet
//!
//! The Solana wallet profile for the Pocket agent.
//!
//! - **Address detection**: Base58 tokens of 32-44 characters in user text
//!   are remembered as the session's wallet address
//! - **Enrichment**: the remembered address fills the owner argument of
//!   balance, swap and transfer tools when the model leaves it out
//! - **Prompt**: the agent's base system prompt
//!
//! ```text
//! "my wallet is Bo4o...4hSC, what's my balance?"
//!        │
//!        ▼  detector
//! ContextStore { wallet_address = "Bo4o...4hSC" }
//!        │
//!        ▼  enrichment
//! check-balance { owner: "Bo4o...4hSC" }
//! ```

use pocket_core::context::{ContextProfile, ContextStore, EnrichmentRule, EnrichmentTable, PatternDetector};
use pocket_core::error::Result;

/// Fact name under which the address is remembered
pub const WALLET_FACT: &str = "wallet_address";

/// Base58 alphabet (no 0, O, I, l), 32 to 44 characters
pub const ADDRESS_PATTERN: &str = r"\b[1-9A-HJ-NP-Za-km-z]{32,44}\b";

pub const PRODUCT_NAME: &str = "Send Pocket";
pub const COMPANY_NAME: &str = "SEND S1";

/// Base system prompt for the wallet agent
pub const BASE_PROMPT: &str = r#"#### Send Pocket - Solana Wallet AI Agent

### GENERAL INFORMATION:
- You are a Web3 AI agent built by the SEND S1 team. Your name is **Send Pocket**.
- You handle Solana blockchain queries and prepare unsigned transactions: wallet information, SOL/SPL ticker information, token swaps, token transfers and limit orders.
- You return unsigned transactions for the user to sign. You **never sign transactions**.

### RESPONSE GUIDELINES:
- Follow each tool's input and output schema exactly. Relay tool output back to the user as returned.
- **Always** check wallet and token balances before preparing any transaction, and mention estimated fees.
- When asked for several transactions at once, prepare the first one, return it, and continue only after the user completes it.

### TOOL USAGE:
- Always pass the user's wallet address as "publicKey" to check-token-balance; never call it with empty arguments.
- When the user mentions a wallet address, use it in your tool calls and keep it in context for later calls.
- If no wallet address is known, ask the user for their Solana wallet address before proceeding.
- Convert fiat amounts to token amounts with the available tools before preparing swaps.

### BALANCE VALIDATION:
- Compare the requested amount with the available balance numerically. The amount must be less than or equal to the balance, fees included.
- Never round balances up. When funds are insufficient, suggest the largest amount the user can transact.

### SECURITY AND PRIVACY:
- The user's wallet is a secure embedded wallet; neither the wallet vendor nor SEND S1 controls it.
- No user data or transaction details are stored or shared.
- If a tool fails (for example with a 5XX error), ask the user to try again later without exposing technical details.

### IMPORTANT NOTES:
- You are a user-centric wallet agent, not an agent wallet.
- Decline queries unrelated to Solana, cryptocurrency or the wallet, and queries outside your functionalities; the SEND S1 team is working on more features.
- Do not restate tool descriptions or echo example data from this prompt.
"#;

/// Whether `candidate` decodes as Base58
pub fn is_base58(candidate: &str) -> bool {
    bs58::decode(candidate).into_vec().is_ok()
}

/// Whether `candidate` decodes to a 32-byte Ed25519 public key
pub fn is_public_key(candidate: &str) -> bool {
    bs58::decode(candidate).into_vec().is_ok_and(|bytes| bytes.len() == 32)
}

/// Address detector: any Base58 token of 32-44 characters
pub fn address_detector() -> Result<PatternDetector> {
    Ok(PatternDetector::new(WALLET_FACT, ADDRESS_PATTERN)?
        .with_validator(is_base58)
        .with_label("wallet address"))
}

/// Like [`address_detector`] but only accepts tokens that decode to a
/// public key. Mint addresses and signatures of other lengths are skipped.
pub fn strict_address_detector() -> Result<PatternDetector> {
    Ok(PatternDetector::new(WALLET_FACT, ADDRESS_PATTERN)?
        .with_validator(is_public_key)
        .with_label("wallet address"))
}

/// Tool arguments the wallet address may fill
pub fn default_enrichment() -> EnrichmentTable {
    EnrichmentTable::new()
        .with_rule(EnrichmentRule::new("check-balance", "owner", WALLET_FACT))
        .with_rule(EnrichmentRule::new("check-token-balance", "publicKey", WALLET_FACT))
        .with_rule(EnrichmentRule::new("prepare-swap", "source", WALLET_FACT))
        .with_rule(EnrichmentRule::new("prepare-transfer", "source", WALLET_FACT))
}

/// Address detector plus the default enrichment table
pub fn wallet_profile() -> Result<ContextProfile> {
    Ok(ContextProfile::new()
        .with_detector(address_detector()?)
        .with_enrichment(default_enrichment().rules().iter().cloned()))
}

/// Wallet-specific view of a session's context
pub trait WalletContext {
    /// Address found in `text`, without remembering it
    fn observe_address(&self, text: &str) -> Option<String>;

    fn remember_address(&mut self, address: &str);

    /// Clear the remembered address, returning it
    fn forget_address(&mut self) -> Option<String>;

    fn wallet_address(&self) -> Option<&str>;
}

impl WalletContext for ContextStore {
    fn observe_address(&self, text: &str) -> Option<String> {
        self.observe(text)
            .into_iter()
            .find(|found| found.fact == WALLET_FACT)
            .map(|found| found.value)
    }

    fn remember_address(&mut self, address: &str) {
        tracing::debug!(address, "Remembering wallet address");
        self.remember(WALLET_FACT, address);
    }

    fn forget_address(&mut self) -> Option<String> {
        self.forget(WALLET_FACT)
    }

    fn wallet_address(&self) -> Option<&str> {
        self.get(WALLET_FACT)
    }
}
