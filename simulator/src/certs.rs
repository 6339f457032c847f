use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_ECDSA_P521_SHA512,
};

use bundlekit_common::Error;

/// Paths of every keypair generated for a simulator home. The private
/// keys never leave this directory.
#[derive(Clone, Debug)]
pub struct CertInfo {
    pub dir: PathBuf,
    pub ca_cert: PathBuf,
    pub ca_cert_key: PathBuf,
    pub etcd_peer_cert: PathBuf,
    pub etcd_peer_cert_key: PathBuf,
    pub etcd_client_cert: PathBuf,
    pub etcd_client_cert_key: PathBuf,
    pub api_cert: PathBuf,
    pub api_cert_key: PathBuf,
    pub kubelet_cert: PathBuf,
    pub kubelet_cert_key: PathBuf,
    pub admin_cert: PathBuf,
    pub admin_cert_key: PathBuf,
    pub service_account_cert: PathBuf,
    pub service_account_cert_key: PathBuf,
}

struct LeafSpec<'a> {
    hosts: &'a [String],
    organization: &'a str,
    common_name: Option<&'a str>,
    key_usages: Vec<KeyUsagePurpose>,
    extended_key_usages: Vec<ExtendedKeyUsagePurpose>,
}

/// Generates a self-signed P-521 CA and the leaf keypairs every
/// simulator component references by path: apiserver, etcd peer and
/// client, admin, service-account signer and kubelet.
pub fn generate_certs(hosts: &[String], dir: &Path) -> Result<CertInfo, Error> {
    let mut all_hosts: Vec<String> = hosts.to_vec();
    for required in ["localhost", "127.0.0.1"] {
        if !all_hosts.iter().any(|h| h == required) {
            all_hosts.push(required.to_owned());
        }
    }

    let ca_key = KeyPair::generate_for(&PKCS_ECDSA_P521_SHA512)?;
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params.distinguished_name = distinguished_name("kubernetes", None);
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    ca_params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let info = CertInfo {
        dir: dir.to_path_buf(),
        ca_cert: dir.join("ca").join("ca-cert.pem"),
        ca_cert_key: dir.join("ca").join("ca-key.pem"),
        etcd_peer_cert: dir.join("peer").join("etcd-peer-cert.pem"),
        etcd_peer_cert_key: dir.join("peer").join("etcd-peer-key.pem"),
        etcd_client_cert: dir.join("client").join("etcd-client-cert.pem"),
        etcd_client_cert_key: dir.join("client").join("etcd-client-key.pem"),
        api_cert: dir.join("kubernetes").join("apiserver-cert.pem"),
        api_cert_key: dir.join("kubernetes").join("apiserver-key.pem"),
        kubelet_cert: dir.join("kubernetes").join("kubelet-cert.pem"),
        kubelet_cert_key: dir.join("kubernetes").join("kubelet-key.pem"),
        admin_cert: dir.join("kubernetes").join("admin-cert.pem"),
        admin_cert_key: dir.join("kubernetes").join("admin-key.pem"),
        service_account_cert: dir.join("kubernetes").join("sa-cert.pem"),
        service_account_cert_key: dir.join("kubernetes").join("sa-key.pem"),
    };

    write_pem(&info.ca_cert, &ca_cert.pem())?;
    write_pem(&info.ca_cert_key, &ca_key.serialize_pem())?;

    let server_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
    ];
    let both_ekus = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];

    let leaves = [
        (
            LeafSpec {
                hosts: &all_hosts,
                organization: "kubernetes",
                common_name: None,
                key_usages: server_usages.clone(),
                extended_key_usages: both_ekus.clone(),
            },
            &info.etcd_peer_cert,
            &info.etcd_peer_cert_key,
        ),
        (
            LeafSpec {
                hosts: &[],
                organization: "kubernetes",
                common_name: Some("etcd-client"),
                key_usages: vec![KeyUsagePurpose::DigitalSignature],
                extended_key_usages: vec![ExtendedKeyUsagePurpose::ClientAuth],
            },
            &info.etcd_client_cert,
            &info.etcd_client_cert_key,
        ),
        (
            LeafSpec {
                hosts: &all_hosts,
                organization: "kubernetes",
                common_name: Some("kubernetes"),
                key_usages: server_usages.clone(),
                extended_key_usages: both_ekus.clone(),
            },
            &info.api_cert,
            &info.api_cert_key,
        ),
        (
            LeafSpec {
                hosts: &all_hosts,
                organization: "system:masters",
                common_name: Some("admin"),
                key_usages: server_usages.clone(),
                extended_key_usages: both_ekus.clone(),
            },
            &info.admin_cert,
            &info.admin_cert_key,
        ),
        (
            LeafSpec {
                hosts: &[],
                organization: "kubernetes",
                common_name: Some("service-accounts"),
                key_usages: vec![KeyUsagePurpose::DigitalSignature],
                extended_key_usages: vec![ExtendedKeyUsagePurpose::ClientAuth],
            },
            &info.service_account_cert,
            &info.service_account_cert_key,
        ),
        (
            LeafSpec {
                hosts: &all_hosts,
                organization: "system:nodes",
                common_name: Some("system:nodes:virtual-kubelet"),
                key_usages: server_usages,
                extended_key_usages: both_ekus,
            },
            &info.kubelet_cert,
            &info.kubelet_cert_key,
        ),
    ];

    for (spec, cert_path, key_path) in leaves {
        let (cert_pem, key_pem) = issue_leaf(&spec, &ca_cert, &ca_key)?;
        write_pem(cert_path, &cert_pem)?;
        write_pem(key_path, &key_pem)?;
    }

    Ok(info)
}

fn issue_leaf(
    spec: &LeafSpec<'_>,
    ca_cert: &Certificate,
    ca_key: &KeyPair,
) -> Result<(String, String), Error> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P521_SHA512)?;
    let mut params = CertificateParams::new(spec.hosts.to_vec())?;
    params.distinguished_name = distinguished_name(spec.organization, spec.common_name);
    params.key_usages = spec.key_usages.clone();
    params.extended_key_usages = spec.extended_key_usages.clone();
    let cert = params.signed_by(&key, ca_cert, ca_key)?;
    Ok((cert.pem(), key.serialize_pem()))
}

fn distinguished_name(organization: &str, common_name: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, organization);
    if let Some(cn) = common_name {
        dn.push(DnType::CommonName, cn);
    }
    dn
}

fn write_pem(path: &Path, pem: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pem)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_cert_and_key(cert: &Path, key: &Path) {
        let cert_pem = std::fs::read(cert).unwrap();
        let certs: Vec<_> = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(!certs.is_empty(), "no certificate in {}", cert.display());

        let key_pem = std::fs::read(key).unwrap();
        let parsed = rustls_pemfile::private_key(&mut key_pem.as_slice()).unwrap();
        assert!(parsed.is_some(), "no private key in {}", key.display());
    }

    #[test]
    fn generates_every_keypair_under_the_home_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let info = generate_certs(&["localhost".to_owned()], tmp.path()).unwrap();

        parse_cert_and_key(&info.ca_cert, &info.ca_cert_key);
        parse_cert_and_key(&info.etcd_peer_cert, &info.etcd_peer_cert_key);
        parse_cert_and_key(&info.etcd_client_cert, &info.etcd_client_cert_key);
        parse_cert_and_key(&info.api_cert, &info.api_cert_key);
        parse_cert_and_key(&info.admin_cert, &info.admin_cert_key);
        parse_cert_and_key(&info.service_account_cert, &info.service_account_cert_key);
        parse_cert_and_key(&info.kubelet_cert, &info.kubelet_cert_key);
    }

    #[test]
    fn layout_matches_the_documented_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let info = generate_certs(&["localhost".to_owned()], tmp.path()).unwrap();
        assert!(info.ca_cert.starts_with(tmp.path().join("ca")));
        assert!(info.etcd_peer_cert.starts_with(tmp.path().join("peer")));
        assert!(info.etcd_client_cert.starts_with(tmp.path().join("client")));
        assert!(info.api_cert.starts_with(tmp.path().join("kubernetes")));
    }
}
