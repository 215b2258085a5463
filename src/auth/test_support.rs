use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::EncodingKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

pub struct RsaMaterial {
    pub private_pem: String,
    pub public_pem: String,
    pub encoding: EncodingKey,
    pub modulus: String,
    pub exponent: String,
}

impl RsaMaterial {
    pub fn generate() -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("key generation");
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("private pem")
            .to_string();
        let public_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("public pem");

        Self {
            encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
            modulus: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            exponent: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            private_pem,
            public_pem,
        }
    }
}
