//! Fixed passwords and key material against values computed independently from
//! [MS-OFFCRYPTO]
use ctxcfb::crypto::{
    ChainingMode, CipherAlgorithm, Decryptor, EncryptionInfo, EncryptionMode, Encryptor,
    HashAlgorithm, KeyMaterial, ENCRYPTED_PACKAGE_STREAM,
};
use ctxcfb::{CompoundFile, Error, Version};
use sha2::{Digest as _, Sha256};

const PASSWORD: &str = "Password1234_";
const PAYLOAD_SHA256: &str = "87a1ba6dd653de5c6d29fa8a05e38baa54e2e789375aec07bbd7e63f9724de90";

fn payload() -> Vec<u8> {
    (0..5000usize)
        .map(|i| ((i * 7) ^ (i >> 9)) as u8)
        .collect()
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|v| format!("{:02x}", v)).collect()
}

fn sha256(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn material(key_size: usize, hash_size: usize) -> KeyMaterial {
    KeyMaterial {
        key_spec: (0x40..0x40 + key_size as u8).collect(),
        key_salt: (0x20..0x30).collect(),
        verifier: (0x00..0x10).collect(),
        verifier_salt: (0x10..0x20).collect(),
        integrity_salt: (0x80..0x80 + hash_size as u8).collect(),
    }
}

struct Encrypted {
    key: String,
    info: EncryptionInfo,
    package: String,
}

/// Encrypts the payload, checks it decrypts back and returns what is pinned
fn encrypt(info: EncryptionInfo, material: &KeyMaterial) -> Result<Encrypted, Error> {
    let mut cf = CompoundFile::new(Version::V3);
    let mut encryptor = Encryptor::new(info);
    encryptor.confirm_password_with(PASSWORD, material)?;
    let key = hex(encryptor.key().expect("confirmed key").as_slice());
    assert_eq!(encryptor.encrypt(&mut cf, payload().as_slice())?, 5000);
    let info = encryptor.info().clone();
    let package = cf.read_stream(cf.get_stream(ENCRYPTED_PACKAGE_STREAM)?)?;
    assert_eq!(&package[0..8], &5000u64.to_le_bytes());

    let cf = CompoundFile::from_bytes(&cf.to_bytes()?)?;
    let mut decryptor = Decryptor::new(&cf)?;
    assert!(decryptor.verify_password(PASSWORD));
    let mut out = Vec::new();
    assert_eq!(decryptor.decrypt(&cf, &mut out)?, 5000);
    assert_eq!(sha256(&out), PAYLOAD_SHA256);
    Ok(Encrypted {
        key,
        info,
        package: sha256(&package),
    })
}

#[test]
fn test_binary_rc4() -> Result<(), Error> {
    let info = EncryptionInfo::builder(EncryptionMode::BinaryRc4).build()?;
    let enc = encrypt(info, &material(0, 0))?;
    assert_eq!(enc.key, "32c87966af");
    assert_eq!(
        enc.package,
        "89b90ebd2284ba4d8d03ccef9dc035359ffc5a5e4999975b3b7c4575db29c466"
    );
    Ok(())
}

#[test]
fn test_cryptoapi() -> Result<(), Error> {
    // Both key sizes share the base hash but differ in the block keys
    let base = "0f1bb10c05454811fa34e3ae6f88754f10b2b90c";
    for (key_bits, package) in [
        (
            40,
            "5c96bba5444ae70ef18e7925c4f40f3c44ef98651c411d8c5b65222152637f2a",
        ),
        (
            128,
            "cf4f003df0f1f18c73b3644a967c1d50ad83e69161610c404419790dca197939",
        ),
    ] {
        let info = EncryptionInfo::builder(EncryptionMode::CryptoApi)
            .key_bits(key_bits)
            .build()?;
        let enc = encrypt(info, &material(0, 0))?;
        assert_eq!(enc.key, base);
        assert_eq!(enc.package, package, "{key_bits} bits");
    }
    Ok(())
}

#[test]
fn test_standard() -> Result<(), Error> {
    for (cipher, key, verifier, package) in [
        (
            CipherAlgorithm::Aes128,
            "53c4f5bc0903311747dc3109a6dbdbb8",
            "1c061570b0fc503daf7a14a99b26278b",
            "ca908229ccb79ccbf6a1762d8f9437661591be337488516927a48cb36bb2f6d3",
        ),
        (
            CipherAlgorithm::Aes256,
            "53c4f5bc0903311747dc3109a6dbdbb8fe2542b9ba2e410b902ada8cbeb93fcf",
            "47bc8bfc478e48abe456d3411a096a14",
            "c2e0c1f7359b494a9259282378d1162d987f71697cfe45fa1e6f1ae15b0a0aa6",
        ),
    ] {
        let info = EncryptionInfo::builder(EncryptionMode::Standard)
            .cipher(cipher)
            .build()?;
        let enc = encrypt(info, &material(0, 0))?;
        assert_eq!(enc.key, key, "{cipher}");
        assert_eq!(enc.package, package, "{cipher}");
        let EncryptionInfo::Standard(se) = &enc.info else {
            panic!("standard expected");
        };
        assert_eq!(hex(&se.verifier.encrypted_verifier), verifier);
    }
    Ok(())
}

struct AgileVector {
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
    chaining: ChainingMode,
    spin_count: u32,
    encrypted_verifier_hash_input: &'static str,
    encrypted_key_value: &'static str,
    encrypted_hmac_key: &'static str,
    encrypted_hmac_value: &'static str,
    package: &'static str,
}

#[test]
fn test_agile() -> Result<(), Error> {
    let vectors = [
        AgileVector {
            cipher: CipherAlgorithm::Aes256,
            hash: HashAlgorithm::Sha512,
            chaining: ChainingMode::Cbc,
            spin_count: 100000,
            encrypted_verifier_hash_input: "2f7fc7e7a11c71068ffea3c77d79b5c1",
            encrypted_key_value: "c32f7dd8d7e2898596d1e77d58ac9c220c17581b2916592969bec6ee1fbce451",
            encrypted_hmac_key: "639087fbef16373f9b8c4db2d1f6827f51ab88865a7b346d98d5b5be00513a9c8f6e26b25ea7bcdb676fe6c9422facefde20b0c129f72832f275729f09ad620b",
            encrypted_hmac_value: "192f9160a2813590c44e5b93af191e7e66ca23459eb0dd5aaea8c55baec46e00de99f3730f167e18ef06d7f816b2e87d5bbf056244f88b6560388b51d81563e9",
            package: "7b1c772be6155ba2c46601123a8a83b57b05fe81a9ef1c58dff30f556634013b",
        },
        AgileVector {
            cipher: CipherAlgorithm::Aes128,
            hash: HashAlgorithm::Sha1,
            chaining: ChainingMode::Cfb,
            spin_count: 1000,
            encrypted_verifier_hash_input: "292728e12d9ede859785c3e4771fa86e",
            encrypted_key_value: "48eaf9e40edd47b4ba0590efe82dc5bd",
            encrypted_hmac_key: "917343d5f56ae056cb6df300ae18aaef734b27e37ebe2e194be1c8239c6797db",
            encrypted_hmac_value: "516020dc8307671e192ddc693cd88d2e6a6b0c26387b81208a73e0003c3d11c4",
            package: "e3e69e6fe6723a1acce1da66cc68ba430042b0bdac04887dc48a1b2101976073",
        },
    ];
    for v in vectors {
        let info = EncryptionInfo::builder(EncryptionMode::Agile)
            .cipher(v.cipher)
            .hash(v.hash)
            .chaining(v.chaining)
            .spin_count(v.spin_count)
            .build()?;
        let key_size = v.cipher.key_bits() as usize / 8;
        let enc = encrypt(info, &material(key_size, v.hash.size()))?;
        assert_eq!(enc.key, hex(&material(key_size, 0).key_spec));
        assert_eq!(enc.package, v.package, "{} {}", v.cipher, v.hash);

        let EncryptionInfo::Agile(agile) = &enc.info else {
            panic!("agile expected");
        };
        let ek = agile.password_key_encryptor().expect("password key encryptor");
        assert_eq!(hex(&ek.encrypted_verifier_hash_input.0), v.encrypted_verifier_hash_input);
        assert_eq!(hex(&ek.encrypted_key_value.0), v.encrypted_key_value);
        let di = agile.data_integrity.as_ref().expect("data integrity");
        assert_eq!(hex(&di.encrypted_hmac_key.0), v.encrypted_hmac_key);
        assert_eq!(hex(&di.encrypted_hmac_value.0), v.encrypted_hmac_value);
    }
    Ok(())
}
