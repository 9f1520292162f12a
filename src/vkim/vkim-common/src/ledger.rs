/*
 * vKIM mail gateway
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::{Address, CertificateIdentity, ErrorCode};

/// Per-address failure bookkeeping for one message.
///
/// Two instances exist per message, one for certificate availability and one
/// for version mismatches. An address recorded here is always classified as
/// either a sender address or a recipient address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressErrorLedger {
    error_certificates: Vec<CertificateIdentity>,
    error_addresses: std::collections::BTreeMap<ErrorCode, Vec<Address>>,
    address_errors: std::collections::BTreeMap<Address, Vec<ErrorCode>>,
    recipient_addresses: Vec<Address>,
    sender_addresses: Vec<Address>,
}

impl AddressErrorLedger {
    /// record `code` for `address`.
    ///
    /// Returns `false` if the pair was already recorded.
    pub fn add(&mut self, address: &Address, code: ErrorCode, is_sender: bool) -> bool {
        let codes = self.address_errors.entry(address.clone()).or_default();
        if codes.contains(&code) {
            return false;
        }
        codes.push(code);

        self.error_addresses
            .entry(code)
            .or_default()
            .push(address.clone());

        let side = if is_sender {
            &mut self.sender_addresses
        } else {
            &mut self.recipient_addresses
        };
        if !side.contains(address) {
            side.push(address.clone());
        }

        tracing::debug!(%address, code = code.id(), is_sender, "error recorded");
        true
    }

    /// record `code` for the address of `identity`, keeping the identity for the report
    pub fn add_identity(
        &mut self,
        identity: &CertificateIdentity,
        code: ErrorCode,
        is_sender: bool,
    ) -> bool {
        if !self
            .error_certificates
            .iter()
            .any(|i| i.address == identity.address)
        {
            self.error_certificates.push(identity.clone());
        }
        self.add(&identity.address, code, is_sender)
    }

    /// at least one code is recorded for `address`
    #[must_use]
    pub fn is_error(&self, address: &Address) -> bool {
        self.address_errors
            .get(address)
            .map_or(false, |codes| !codes.is_empty())
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.address_errors.is_empty()
    }

    /// codes recorded for `address`, in insertion order
    #[must_use]
    pub fn codes_for(&self, address: &Address) -> &[ErrorCode] {
        self.address_errors
            .get(address)
            .map_or(&[], Vec::as_slice)
    }

    /// addresses affected by `code`, in insertion order
    #[must_use]
    pub fn addresses_for(&self, code: ErrorCode) -> &[Address] {
        self.error_addresses.get(&code).map_or(&[], Vec::as_slice)
    }

    ///
    #[must_use]
    pub fn sender_addresses(&self) -> &[Address] {
        &self.sender_addresses
    }

    ///
    #[must_use]
    pub fn recipient_addresses(&self) -> &[Address] {
        &self.recipient_addresses
    }

    ///
    #[must_use]
    pub fn error_certificates(&self) -> &[CertificateIdentity] {
        &self.error_certificates
    }

    ///
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// RCPT TO rejections issued by the backend, one code per address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientRejectLedger {
    rejects: std::collections::BTreeMap<Address, ErrorCode>,
}

impl RecipientRejectLedger {
    ///
    pub fn add(&mut self, address: &Address, code: ErrorCode) {
        self.rejects.insert(address.clone(), code);
    }

    ///
    #[must_use]
    pub fn is_error(&self, address: &Address) -> bool {
        self.rejects.contains_key(address)
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rejects.is_empty()
    }

    ///
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &ErrorCode)> {
        self.rejects.iter()
    }

    ///
    pub fn clear(&mut self) {
        self.rejects.clear();
    }
}

/// An ordered set of codes, for the stages that fail as a whole
/// (sign/encrypt, envelope format, decryption, signature verification).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeLedger {
    codes: Vec<ErrorCode>,
}

impl CodeLedger {
    ///
    pub fn add(&mut self, code: ErrorCode) {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
    }

    ///
    pub fn extend(&mut self, codes: impl IntoIterator<Item = ErrorCode>) {
        for code in codes {
            self.add(code);
        }
    }

    ///
    #[must_use]
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.codes.contains(&code)
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    ///
    #[must_use]
    pub fn codes(&self) -> &[ErrorCode] {
        &self.codes
    }

    ///
    pub fn clear(&mut self) {
        self.codes.clear();
    }
}

/// Every ledger of one message. Lives on the session's logger context and is
/// reset when a new message starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLedgers {
    /// certificate availability, per address
    pub certificates: AddressErrorLedger,
    /// version mismatches, per address
    pub versions: AddressErrorLedger,
    /// backend RCPT TO rejections
    pub recipient_rejects: RecipientRejectLedger,
    ///
    pub sign_encrypt: CodeLedger,
    ///
    pub encrypt_format: CodeLedger,
    ///
    pub decrypt: CodeLedger,
    ///
    pub sign_verify: CodeLedger,
}

impl MessageLedgers {
    ///
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[test]
    fn pair_recorded_once() {
        let mut ledger = AddressErrorLedger::default();
        assert!(ledger.is_empty());

        assert!(ledger.add(&addr("a@kim.de"), ErrorCode::X005, false));
        assert!(!ledger.add(&addr("A@KIM.DE"), ErrorCode::X005, false));
        assert!(ledger.add(&addr("a@kim.de"), ErrorCode::C4005, false));

        pretty_assertions::assert_eq!(
            ledger.codes_for(&addr("a@kim.de")),
            &[ErrorCode::X005, ErrorCode::C4005]
        );
        pretty_assertions::assert_eq!(ledger.addresses_for(ErrorCode::X005), &[addr("a@kim.de")]);
        pretty_assertions::assert_eq!(ledger.recipient_addresses(), &[addr("a@kim.de")]);
        assert!(ledger.sender_addresses().is_empty());
        assert!(ledger.is_error(&addr("a@kim.de")));
        assert!(!ledger.is_error(&addr("b@kim.de")));
    }

    #[test]
    fn every_recorded_address_is_classified() {
        let mut ledger = AddressErrorLedger::default();
        ledger.add(&addr("sender@kim.de"), ErrorCode::X006, true);
        ledger.add_identity(
            &CertificateIdentity::new(addr("rcpt@kim.de")),
            ErrorCode::X005,
            false,
        );

        for address in [addr("sender@kim.de"), addr("rcpt@kim.de")] {
            assert!(
                ledger.sender_addresses().contains(&address)
                    || ledger.recipient_addresses().contains(&address)
            );
        }
        pretty_assertions::assert_eq!(ledger.error_certificates().len(), 1);
    }

    #[test]
    fn reset_between_messages() {
        let mut ledgers = MessageLedgers::default();
        ledgers.sign_encrypt.add(ErrorCode::X009);
        ledgers.sign_encrypt.add(ErrorCode::X009);
        ledgers
            .recipient_rejects
            .add(&addr("b@kim.de"), ErrorCode::X024);
        pretty_assertions::assert_eq!(ledgers.sign_encrypt.codes(), &[ErrorCode::X009]);

        ledgers.reset();
        pretty_assertions::assert_eq!(ledgers, MessageLedgers::default());
    }
}
