use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use micloud::crypto::{
    self, decrypt, encrypt, enc_signature, generate_nonce, password_hash, path_after_domain,
    plain_signature, signed_nonce, CryptoError,
};
use micloud::OrderedParams;

const SSECURITY: &str = "AAECAwQFBgcICQoLDA0ODw==";
// bytes 1..=8 followed by minute counter 28_000_000
const NONCE: &str = "AQIDBAUGBwgBqz8A";
const SIGNED_NONCE: &str = "y/F6Ptt0mgmPxnuby86C4q1qXG3YqVjz5M73Y4YdtFA=";
const URL: &str = "https://de.api.io.mi.com/app/miotspec/prop/get";

fn data_params() -> OrderedParams {
    OrderedParams::new().with("data", r#"{"datasource":1}"#)
}

#[test]
fn rc4_drop1024_known_answer() {
    let ciphertext = encrypt(b"Key", b"Plaintext").unwrap();
    assert_eq!(
        ciphertext,
        vec![0x9a, 0xe4, 0x66, 0x36, 0x8e, 0x7e, 0xa8, 0xf2, 0xf5]
    );
}

#[test]
fn rc4_round_trip_for_various_keys_and_payloads() {
    let keys: [&[u8]; 3] = [b"k", &[0u8; 32], &[0xff; 256]];
    let payloads: [&[u8]; 3] = [b"", b"hello world", &[7u8; 4096]];
    for key in keys {
        for payload in payloads {
            let sealed = encrypt(key, payload).unwrap();
            assert_eq!(sealed.len(), payload.len());
            assert_eq!(decrypt(key, &sealed).unwrap(), payload);
        }
    }
}

#[test]
fn rc4_rejects_empty_key() {
    assert_eq!(encrypt(b"", b"x"), Err(CryptoError::InvalidKeyLength(0)));
    assert_eq!(
        encrypt(&[1u8; 257], b"x"),
        Err(CryptoError::InvalidKeyLength(257))
    );
}

#[test]
fn base64_codec_matches_api_reply() {
    let sealed = crypto::encrypt_b64(SIGNED_NONCE, r#"{"code":0}"#).unwrap();
    assert_eq!(sealed, "5hWDwOVnk/2AAg==");
    let opened = crypto::decrypt_b64(SIGNED_NONCE, &sealed).unwrap();
    assert_eq!(opened, br#"{"code":0}"#);
}

#[test]
fn nonce_has_random_prefix_and_minute_counter() {
    let millis = 1_680_000_123_456u64;
    let first = STANDARD.decode(generate_nonce(millis)).unwrap();
    let second = STANDARD.decode(generate_nonce(millis)).unwrap();
    assert_eq!(first.len(), 12);
    assert_eq!(second.len(), 12);
    let minutes = ((millis / 60_000) as u32).to_be_bytes();
    assert_eq!(&first[8..], &minutes);
    assert_eq!(&second[8..], &minutes);
    assert_ne!(first[..8], second[..8]);
}

#[test]
fn signed_nonce_known_answer_and_deterministic() {
    assert_eq!(signed_nonce(SSECURITY, NONCE).unwrap(), SIGNED_NONCE);
    assert_eq!(
        signed_nonce(SSECURITY, NONCE).unwrap(),
        signed_nonce(SSECURITY, NONCE).unwrap()
    );
}

#[test]
fn signed_nonce_rejects_bad_base64() {
    let err = signed_nonce("not base64!", NONCE).unwrap_err();
    assert!(matches!(err, CryptoError::Base64 { field: "ssecurity", .. }));
}

#[test]
fn enc_signature_known_answer() {
    let sig = enc_signature(URL, "post", SIGNED_NONCE, &data_params());
    assert_eq!(sig, "Es4N7wtQ1vYPFt2ANvtDa6P8RJw=");
    assert_eq!(sig, enc_signature(URL, "POST", SIGNED_NONCE, &data_params()));
}

#[test]
fn plain_signature_known_answer() {
    let sig = plain_signature(URL, SIGNED_NONCE, NONCE, &data_params()).unwrap();
    assert_eq!(sig, "im/mNxqtVcxdD2JEakl0NO3l00sqMeFRGz3Snc4Lx+o=");
}

#[test]
fn signatures_depend_on_parameter_order() {
    let ab = OrderedParams::new().with("a", "1").with("b", "2");
    let ba = OrderedParams::new().with("b", "2").with("a", "1");
    assert_ne!(
        enc_signature(URL, "POST", SIGNED_NONCE, &ab),
        enc_signature(URL, "POST", SIGNED_NONCE, &ba)
    );
    assert_ne!(
        plain_signature(URL, SIGNED_NONCE, NONCE, &ab).unwrap(),
        plain_signature(URL, SIGNED_NONCE, NONCE, &ba).unwrap()
    );
}

#[test]
fn path_after_domain_splits_on_first_dot_com() {
    assert_eq!(path_after_domain(URL), "/app/miotspec/prop/get");
    assert_eq!(
        path_after_domain("https://api.io.mi.com/app/home/device_list"),
        "/app/home/device_list"
    );
    assert_eq!(path_after_domain("http://localhost/app/x"), "http://localhost/app/x");
}

#[test]
fn password_hash_is_upper_hex_md5() {
    assert_eq!(password_hash("p"), "83878C91171338902E0FE0FB97A8C47A");
}

#[test]
fn ordered_params_keep_insertion_order_on_replace() {
    let mut params = OrderedParams::new().with("z", "1").with("a", "2");
    params.insert("z", "3");
    let pairs: Vec<_> = params.iter().collect();
    assert_eq!(pairs, vec![("z", "3"), ("a", "2")]);
}
