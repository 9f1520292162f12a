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

macro_rules! error_codes {
    ($( $(#[$doc:meta])* $variant:ident => $id:literal, $text:expr; )*) => {
        /// Diagnostic codes of the KIM profile, reported to end users in DSNs and
        /// in the `X-KIM-*` headers.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[allow(missing_docs)]
        pub enum ErrorCode {
            $( $(#[$doc])* $variant, )*
        }

        impl ErrorCode {
            /// every code, in catalogue order
            pub const ALL: &'static [Self] = &[$( Self::$variant, )*];

            /// identifier as written in headers, `4008` or `X005`
            #[must_use]
            pub const fn id(self) -> &'static str {
                match self {
                    $( Self::$variant => $id, )*
                }
            }

            /// human readable text (german, as mandated by the profile)
            #[must_use]
            pub const fn text(self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )*
                }
            }
        }

        impl std::str::FromStr for ErrorCode {
            type Err = crate::GatewayError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $id => Ok(Self::$variant), )*
                    _ => Err(crate::GatewayError::InvalidArgument(format!("unknown error code '{s}'"))),
                }
            }
        }
    };
}

error_codes! {
    /// recipient removed, wrong KIM version
    C4001 => "4001", "Empfänger entfernt, wegen falscher KIM-Version";
    C4002 => "4002", "Anhang konnte nicht zum KOM-LE-Attachment-Service übertragen werden";
    /// no unique practitioner id with an encryption certificate (sender)
    C4003 => "4003", "keine eindeutige Telematik-ID mit Verschlüsselungszertifikat gefunden";
    C4004 => "4004", "Nachricht nicht für alle Empfänger verschlüsselbar";
    /// several practitioner ids for one recipient
    C4005 => "4005", "Für einen Empfänger existieren mehrere Verschlüsselungszertifikate mit unterschiedlichen Telematik-IDs";
    C4006 => "4006", "Anhang konnte nicht vom KOM-LE-Attachment-Service geladen werden";
    C4007 => "4007", "beim Entschlüsseln eines Anhangs ist ein Fehler aufgetreten";
    /// unsupported message version
    C4008 => "4008", "Das verwendete Client-Modul unterstützt die in der Mail verwendete Version nicht";
    /// no key available for decryption
    C4009 => "4009", "Die KIM-Nachricht konnte auf Grund eines nicht verfügbaren Schlüssels nicht entschlüsselt werden";
    /// wrong envelope format
    C4010 => "4010", "Die KIM-Nachricht konnte aufgrund des falschen Formats nicht entschlüsselt werden";
    /// connector unavailable for decryption
    C4011 => "4011", "Der Konnektor steht für die Entschlüsselung nicht zur Verfügung";
    C4012 => "4012", "Die Prüfsumme des Anhangs stimmt nicht mit der dem Anhang beigefügten Prüfsumme überein. Der empfangene Anhang entspricht eventuell nicht dem originalen Anhang";
    C4013 => "4013", "Anhang konnte nicht heruntergeladen werden, da durch zu häufigen Zugriff der KOM-LE-Attachment-Service den Abruf verweigert.";
    C4014 => "4014", concat!(
        "Die Prüfung der Nachricht hat ergeben, dass die Nachricht nach dem Verschlüsseln manipuliert wurde. Möglicherweise ",
        "wurde die verschlüsselte Nachricht auch an einen nicht empfangsberechtigten Personenkreis versendet."
    );
    C4015 => "4015", concat!(
        "Die Prüfung der Signatur der Nachricht hat ergeben, dass die Nachricht manipuliert wurde, um einem anderen ",
        "Nutzer das Entschlüsseln der Nachricht mit einem Schlüssel, der nicht in seinem Besitz ist, zu ermöglichen"
    );
    C4016 => "4016", "Bei der Aktualisierung der PKCS#12-Datei ist ein Fehler aufgetreten";
    C4017 => "4017", "Die KIM-Version des Client-Moduls ist kleiner als die im Verzeichnisdienst zu seinem Eintrag hinterlegte Version";
    C4112 => "4112", "Die digitale Signatur konnte aufgrund des falschen Formats nicht geprüft werden";
    /// integrity violated
    C4115 => "4115", "Die Integrität der Nachricht wurde verletzt";
    C4206 => "4206", "Der Zertifizierungspfad des Signaturzertifikats kann nicht validiert werden";
    /// no signature
    C4253 => "4253", "Die digitale Signatur ist nicht vorhanden";
    C4264 => "4264", "Die digitale Signatur ist mathematisch korrekt, der Zertifikatsstatus des Signaturzertifikats konnte aber nicht geprüft werden";
    /// outer and inner headers differ
    X001 => "X001", concat!(
        "Die digitale Signatur ist mathematisch korrekt und der Zertifikatsstatus des Signaturzertifikats konnte erfolgreich ",
        "geprüft werden, aber beim Vergleich der Header-Elemente from, sender, reply-to, to und cc der äußeren Nachricht mit denen der inneren Nachricht ",
        "wurden Abweichungen festgestellt."
    );
    X002 => "X002", "Die digitale Signatur konnte aufgrund eines nicht zuordenbaren Fehlercodes des Konnektors nicht geprüft werden";
    X003 => "X003", concat!(
        "Die digitale Signatur ist mathematisch korrekt und der Zertifikatsstatus des Signaturzertifikats ",
        "konnte erfolgreich geprüft werden, aber das recipient-emails-Attribut aus signerInfos enthält nicht die gleichen Werte wie das ",
        "recipient-emails-Attribut aus dem enveloped-data CMS-Objekt"
    );
    /// directory unavailable
    X004 => "X004", "Der Gematik-Verzeichnisdienst seht nicht zur Verfügung";
    /// no certificate for a recipient
    X005 => "X005", "Für einen Empfänger existiert kein Verschlüsselungszertifikat";
    /// no certificate for the sender
    X006 => "X006", "Für den Absender existiert kein Verschlüsselungszertifikat";
    /// several practitioner ids for the sender
    X007 => "X007", "Für den Absender existieren mehrere Verschlüsselungszertifikate mit unterschiedlichen Telematik-IDs";
    /// the directory advertises a newer version for the sender
    X008 => "X008", "Für den Absender ist eine höhere KIM-Version im Gematik-Verzeichnisdienst hinterlegt als die Version des KIM-Clientmoduls";
    X009 => "X009", "Bei der Signierung der Mail ist ein Fehler aufgetreten";
    X010 => "X010", "Fehler bei der Selektion der Karte zum Signieren. Entweder steht der Konnektor nicht zur Verfügung oder der PIN-STATUS der SMC-B ist nicht verifiziert";
    X011 => "X011", "Bei der Verschlüsselung der Mail ist ein Fehler aufgetreten";
    X012 => "X012", "Beim Fertigstellen der signierten und verschlüsselten Mail ist ein Fehler aufgetreten";
    X013 => "X013", "Beim Überprüfen der zu versendenden Mail ist ein Fehler aufgetreten";
    X014 => "X014", "Header X-KOM-LE-Version mit der entsprechenden Version (1.0 oder 1.5) nicht gesetzt";
    X015 => "X015", "Subject nicht auf KOM-LE-Nachricht gesetzt";
    X016 => "X016", "Content-Type nicht auf application/pkcs7-mime gesetzt";
    X017 => "X017", "EnvelopedData im falschen Format, fehlerhafte OID: 1.2.840.113549.1.7.3 statt 1.2.840.113549.1.9.16.1.23";
    X018 => "X018", "EncryptedRecipientInfos nicht verfügbar";
    X019 => "X019", "EncryptedRecipientEmails nicht verfügbar";
    X020 => "X020", "Beim Überprüfen des Encrypt-Formats der Mail ist ein unbekannter Fehler aufgetreten";
    X021 => "X021", "Die Karte für das Entschlüsseln konnte nicht gefunden werden";
    X022 => "X022", "CertIssuerAndSerialNumber in ContentInfo konnte für die Empfänger-Adresse nicht gefunden werden";
    X023 => "X023", "Verschlüsselte Mail konnte nicht extrahiert werden und der signed Inhalt nicht geparst werden";
    /// the backend refused RCPT TO
    X024 => "X024", "Der SMTP-Befehl RCPT-TO für den Empfänger ist fehlgeschlagen";
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.id(), self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;

    #[test]
    fn ids_are_unique() {
        let mut ids = ErrorCode::ALL.iter().map(|c| c.id()).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        pretty_assertions::assert_eq!(ids.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn display() {
        pretty_assertions::assert_eq!(
            ErrorCode::X005.to_string(),
            "X005 - Für einen Empfänger existiert kein Verschlüsselungszertifikat"
        );
        pretty_assertions::assert_eq!("4008".parse::<ErrorCode>().unwrap(), ErrorCode::C4008);
        assert!("9999".parse::<ErrorCode>().is_err());
    }
}
