/// Stateless validation of incoming transactions
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Checks that every identifying field is present.
    pub fn validate_fields(&self) -> Result<(), ChainError> {
        let required = [
            ("trade_id", &self.trade_id),
            ("user_id", &self.user_id),
            ("exchange_user_id", &self.exchange_user_id),
            ("exchange_id", &self.exchange_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ChainError::InvalidTransaction(format!(
                    "{} is a required value",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Verifies the envelope signature over the transaction hash.
    pub fn validate_signature(&self) -> Result<(), ChainError> {
        if self.signer.is_empty() || self.signature.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Transaction not signed".to_string(),
            ));
        }

        let message = self.signable_message();
        crate::crypto::verify_hex_signature(&self.signer, &message, &self.signature)
    }

    /// Full stateless validation: fields first, then the signature.
    pub fn validate(&self) -> Result<(), ChainError> {
        self.validate_fields()?;
        self.validate_signature()
    }
}
