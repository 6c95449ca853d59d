//! Certificate serial numbers and PEM helpers built on openssl.

use crate::vault::error::{ResultExt, VaultError};
use crate::vault::pki::types::{PkiKeyType, Subject, SubjectSettings};
use openssl::asn1::Asn1Type;
use openssl::bn::BigNumRef;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey};
use openssl::x509::{X509NameRef, X509};

/// Renders a serial number the way Vault does: lowercase hex, one `:` between
/// every two digits, e.g. `12:03:0f`.
pub fn format_serial_number(serial: &BigNumRef) -> Result<String, VaultError> {
    let hex = serial
        .to_hex_str()
        .coding_context("failed to render serial number")?
        .to_ascii_lowercase();
    let digits = hex.trim_start_matches('-');
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };

    let pairs: Vec<&str> = padded
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect();
    Ok(pairs.join(":"))
}

/// Vault lists certificate serials as `12-03-0f`; this restores the `:` form.
pub(crate) fn normalize_listed_serial(key: &str) -> String {
    key.replace('-', ":")
}

pub(crate) fn parse_certificate(pem: &str) -> Result<X509, VaultError> {
    X509::from_pem(pem.as_bytes()).api_context("failed to parse certificate PEM")
}

pub(crate) fn certificate_serial(cert: &X509) -> Result<String, VaultError> {
    let serial = cert
        .serial_number()
        .to_bn()
        .coding_context("failed to read certificate serial number")?;
    format_serial_number(&serial)
}

/// Determines the algorithm of a PEM encoded private key.
///
/// PKCS#1 and SEC1 keys are identified by their PEM label, PKCS#8 keys by parsing them.
pub fn private_key_type(pem: &str) -> Result<PkiKeyType, VaultError> {
    let label = pem
        .lines()
        .map(str::trim)
        .find_map(|line| {
            line.strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
        })
        .ok_or_else(|| VaultError::api("failed to decode private key pem"))?;

    match label {
        "RSA PRIVATE KEY" => Ok(PkiKeyType::Rsa),
        "EC PRIVATE KEY" => Ok(PkiKeyType::Ec),
        "PRIVATE KEY" => {
            let key = PKey::private_key_from_pem(pem.as_bytes())
                .api_context("failed to parse private key")?;
            match key.id() {
                Id::RSA => Ok(PkiKeyType::Rsa),
                Id::EC => Ok(PkiKeyType::Ec),
                Id::ED25519 => Ok(PkiKeyType::Ed25519),
                _ => Err(VaultError::api("encountered unknown private key type")),
            }
        }
        _ => Err(VaultError::api("encountered unknown pem block type")),
    }
}

fn name_entries(name: &X509NameRef, nid: Nid) -> Vec<String> {
    name.entries_by_nid(nid)
        .map(|entry| decode_name_entry(entry.data().type_(), entry.data().as_slice()))
        .collect()
}

// Decodes the raw string bytes, interior NUL bytes included.
fn decode_name_entry(string_type: Asn1Type, bytes: &[u8]) -> String {
    if string_type == Asn1Type::BMPSTRING {
        let units: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Extracts the subject of a certificate.
pub(crate) fn certificate_subject(cert: &X509) -> Subject {
    let name = cert.subject_name();
    Subject {
        common_name: name_entries(name, Nid::COMMONNAME)
            .into_iter()
            .next()
            .unwrap_or_default(),
        serial_number: name_entries(name, Nid::SERIALNUMBER)
            .into_iter()
            .next()
            .unwrap_or_default(),
        settings: SubjectSettings {
            organization: name_entries(name, Nid::ORGANIZATIONNAME).into(),
            organizational_unit: name_entries(name, Nid::ORGANIZATIONALUNITNAME).into(),
            country: name_entries(name, Nid::COUNTRYNAME).into(),
            locality: name_entries(name, Nid::LOCALITYNAME).into(),
            province: name_entries(name, Nid::STATEORPROVINCENAME).into(),
            street_address: name_entries(name, Nid::STREETADDRESS).into(),
            postal_code: name_entries(name, Nid::POSTALCODE).into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::x509::X509NameBuilder;

    fn is_serial_shaped(serial: &str) -> bool {
        serial.split(':').all(|pair| {
            pair.len() == 2 && pair.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
    }

    #[test]
    fn test_format_serial_number() {
        let serial = BigNum::from_dec_str("102830064483232847570845223631797449308202024258").unwrap();
        assert_eq!(
            format_serial_number(&serial).unwrap(),
            "12:03:0f:3f:bc:a0:d9:fa:99:a1:c0:4a:13:d3:22:5c:f7:9f:3d:42"
        );
    }

    #[test]
    fn test_format_serial_number_pads_odd_length() {
        let serial = BigNum::from_u32(0xabc).unwrap();
        let formatted = format_serial_number(&serial).unwrap();
        assert_eq!(formatted, "0a:bc");
        assert!(is_serial_shaped(&formatted));
    }

    #[test]
    fn test_normalize_listed_serial() {
        assert_eq!(normalize_listed_serial("12-03-0f"), "12:03:0f");
    }

    #[test]
    fn test_private_key_type_by_label() {
        let rsa = Rsa::generate(2048).unwrap();
        let pkcs1 = String::from_utf8(rsa.private_key_to_pem().unwrap()).unwrap();
        assert_eq!(private_key_type(&pkcs1).unwrap(), PkiKeyType::Rsa);

        let pkcs8 = String::from_utf8(
            PKey::from_rsa(rsa).unwrap().private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap();
        assert_eq!(private_key_type(&pkcs8).unwrap(), PkiKeyType::Rsa);

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ec = EcKey::generate(&group).unwrap();
        let sec1 = String::from_utf8(ec.private_key_to_pem().unwrap()).unwrap();
        assert_eq!(private_key_type(&sec1).unwrap(), PkiKeyType::Ec);

        let ec_pkcs8 = String::from_utf8(
            PKey::from_ec_key(ec).unwrap().private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap();
        assert_eq!(private_key_type(&ec_pkcs8).unwrap(), PkiKeyType::Ec);

        assert!(private_key_type("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----").is_err());
        assert!(private_key_type("not pem").is_err());
    }

    #[test]
    fn test_certificate_subject_and_serial() {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "example.com").unwrap();
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Example Org").unwrap();
        name.append_entry_by_nid(Nid::COUNTRYNAME, "AT").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(0x1203).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let pem = String::from_utf8(builder.build().to_pem().unwrap()).unwrap();

        let cert = parse_certificate(&pem).unwrap();
        assert_eq!(certificate_serial(&cert).unwrap(), "12:03");
        let subject = certificate_subject(&cert);
        assert_eq!(subject.common_name, "example.com");
        assert_eq!(subject.settings.organization.0, vec!["Example Org"]);
        assert_eq!(subject.settings.country.0, vec!["AT"]);
        assert!(subject.settings.locality.is_empty());
    }

    #[test]
    fn test_decode_name_entry_keeps_full_value() {
        assert_eq!(decode_name_entry(Asn1Type::UTF8STRING, b"Team\0Ops"), "Team\u{0}Ops");
        assert_eq!(decode_name_entry(Asn1Type::UTF8STRING, "Österreich".as_bytes()), "Österreich");
        assert_eq!(decode_name_entry(Asn1Type::BMPSTRING, &[0x00, 0xd6, 0x00, 0x42]), "ÖB");
    }
}
