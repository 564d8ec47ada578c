//! Credential bootstrap and renewal driven end to end, with in-memory
//! collaborators standing in for the CA and the device key store.

use std::convert::Infallible;
use std::sync::Mutex;

use assert_matches::assert_matches;
use tokio::io::DuplexStream;

use mash_commissioning::enrollment::{self, CaSigner, CsrBundle, DeviceKeyStore, KeyStoreError, SignedCertificates};
use mash_commissioning::framing;
use mash_commissioning::messages::{
    CertRenewalCsr, ErrorCode, Message, RenewalStatus,
};
use mash_commissioning::renewal::{self, compute_nonce_hash};
use mash_commissioning::{
    CancellationToken, EnrollmentError, PaseClient, PaseServer, RenewalError, SetupCode, SetupVerifier,
};

const ZONE_TYPE: u8 = 1;
const ZONE_PRIORITY: u8 = 7;

/// Signs by prefixing; enough to check that bytes flow through unmodified.
struct TestCaSigner;

impl CaSigner for TestCaSigner {
    type Error = Infallible;

    async fn sign(
        &self,
        csr: &[u8],
        _attestation_cert: Option<&[u8]>,
        _zone_type: u8,
        _zone_priority: u8,
    ) -> Result<SignedCertificates, Infallible> {
        Ok(SignedCertificates {
            operational_cert: [b"cert:".as_slice(), csr].concat(),
            ca_cert: b"ca-cert".to_vec(),
        })
    }
}

#[derive(Default)]
struct InstalledCertificate {
    operational_cert: Vec<u8>,
    sequence: u32,
}

/// Records installs; configurable to refuse them.
#[derive(Default)]
struct TestKeyStore {
    installed: Mutex<Option<InstalledCertificate>>,
    zone_occupied: bool,
    refuse_renewal: bool,
}

impl DeviceKeyStore for TestKeyStore {
    async fn create_csr(&self, nonce: &[u8]) -> Result<CsrBundle, KeyStoreError> {
        Ok(CsrBundle {
            csr: [b"csr:".as_slice(), nonce].concat(),
            attestation_cert: None,
        })
    }

    async fn install_certificate(
        &self,
        operational_cert: &[u8],
        _ca_cert: &[u8],
        _zone_type: u8,
        _zone_priority: u8,
    ) -> Result<(), KeyStoreError> {
        if self.zone_occupied {
            return Err(KeyStoreError::ZoneTypeExists);
        }

        *self.installed.lock().unwrap() = Some(InstalledCertificate {
            operational_cert: operational_cert.to_vec(),
            sequence: 0,
        });
        Ok(())
    }

    async fn renew_certificate(&self, new_cert: &[u8], sequence: u32) -> Result<(), KeyStoreError> {
        if self.refuse_renewal {
            return Err(KeyStoreError::InvalidCertificate("not issued by our zone CA".to_string()));
        }

        *self.installed.lock().unwrap() = Some(InstalledCertificate {
            operational_cert: new_cert.to_vec(),
            sequence,
        });
        Ok(())
    }
}

fn streams() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(4096)
}

/// The whole commissioning lifecycle over one stream: PASE with the split
/// server entry points, credential bootstrap, then a renewal.
#[tokio::test]
async fn full_commissioning_flow() {
    let setup_code = SetupCode::new(12_345_678).unwrap();
    let verifier = SetupVerifier::generate(&setup_code, b"controller", b"device").unwrap();

    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();
    let keystore = TestKeyStore::default();

    let device_cancel = cancel.clone();
    let device = tokio::spawn(async move {
        let server = PaseServer::new(&verifier, b"device").unwrap();

        // Where an embedding would take its commissioning lock.
        let request = PaseServer::await_initial(&mut device_stream, &device_cancel).await.unwrap();
        let secret = server.complete(&mut device_stream, &device_cancel, request).await.unwrap();

        enrollment::serve_commissioning(&mut device_stream, &device_cancel, &keystore)
            .await
            .unwrap();
        let active = renewal::serve_renewal(&mut device_stream, &device_cancel, &keystore, 1)
            .await
            .unwrap();

        let installed_sequence = keystore.installed.lock().unwrap().as_ref().unwrap().sequence;
        (secret, active, installed_sequence)
    });

    let client = PaseClient::new(&setup_code, b"controller", b"device").unwrap();
    let controller_secret = client.handshake(&mut controller_stream, &cancel).await.unwrap();

    enrollment::commission(&mut controller_stream, &cancel, &TestCaSigner, ZONE_TYPE, ZONE_PRIORITY)
        .await
        .unwrap();
    let active = renewal::renew(&mut controller_stream, &cancel, &TestCaSigner, None, ZONE_TYPE, ZONE_PRIORITY, 2)
        .await
        .unwrap();

    let (device_secret, device_active, installed_sequence) = device.await.unwrap();

    assert_eq!(controller_secret, device_secret);
    assert_eq!(active, 2);
    assert_eq!(device_active, 2);
    assert_eq!(installed_sequence, 2);
}

#[tokio::test]
async fn bootstrap_installs_a_signed_certificate() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();
    let keystore = TestKeyStore::default();

    let device_cancel = cancel.clone();
    let (controller_result, device_result) = tokio::join!(
        enrollment::commission(&mut controller_stream, &cancel, &TestCaSigner, ZONE_TYPE, ZONE_PRIORITY),
        enrollment::serve_commissioning(&mut device_stream, &device_cancel, &keystore),
    );

    controller_result.unwrap();
    device_result.unwrap();

    let installed = keystore.installed.lock().unwrap();
    let installed = installed.as_ref().unwrap();
    // The CA saw the device's nonce-bound CSR.
    assert!(installed.operational_cert.starts_with(b"cert:csr:"));
}

#[tokio::test]
async fn occupied_zone_type_rejects_the_install() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();
    let keystore = TestKeyStore {
        zone_occupied: true,
        ..TestKeyStore::default()
    };

    let device_cancel = cancel.clone();
    let (controller_result, device_result) = tokio::join!(
        enrollment::commission(&mut controller_stream, &cancel, &TestCaSigner, ZONE_TYPE, ZONE_PRIORITY),
        enrollment::serve_commissioning(&mut device_stream, &device_cancel, &keystore),
    );

    assert_matches!(
        controller_result,
        Err(EnrollmentError::CertInstall(ErrorCode::ZoneTypeExists))
    );
    assert_matches!(device_result, Err(EnrollmentError::KeyStore(KeyStoreError::ZoneTypeExists)));
}

#[tokio::test]
async fn renewal_activates_the_new_sequence() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();
    let keystore = TestKeyStore::default();

    let device_cancel = cancel.clone();
    let (controller_result, device_result) = tokio::join!(
        renewal::renew(
            &mut controller_stream,
            &cancel,
            &TestCaSigner,
            Some(b"zone-ca".to_vec()),
            ZONE_TYPE,
            ZONE_PRIORITY,
            9,
        ),
        renewal::serve_renewal(&mut device_stream, &device_cancel, &keystore, 8),
    );

    assert_eq!(controller_result.unwrap(), 9);
    assert_eq!(device_result.unwrap(), 9);

    let installed = keystore.installed.lock().unwrap();
    assert_eq!(installed.as_ref().unwrap().sequence, 9);
}

#[tokio::test]
async fn renewal_aborts_on_a_mutated_nonce_hash() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();

    // A device that tampers with the binding: hash of a different nonce.
    let device = tokio::spawn(async move {
        let request = match framing::read_message(&mut device_stream).await.unwrap() {
            Message::CertRenewalRequest(request) => request,
            other => panic!("unexpected message: {other:?}"),
        };

        let mut wrong_nonce = request.nonce;
        wrong_nonce[0] ^= 0x01;
        let reply = Message::CertRenewalCsr(CertRenewalCsr {
            csr: b"csr".to_vec(),
            nonce_hash: Some(compute_nonce_hash(&wrong_nonce)),
        });
        framing::write_message(&mut device_stream, &reply).await.unwrap();

        // The controller must answer with an invalid-nonce acknowledgement.
        framing::read_message(&mut device_stream).await.unwrap()
    });

    let controller_result = renewal::renew(
        &mut controller_stream,
        &cancel,
        &TestCaSigner,
        None,
        ZONE_TYPE,
        ZONE_PRIORITY,
        3,
    )
    .await;

    assert_matches!(controller_result, Err(RenewalError::NonceMismatch));
    assert_matches!(device.await.unwrap(), Message::CertRenewalAck(ack) => {
        assert_eq!(ack.status, RenewalStatus::InvalidNonce);
    });
}

#[tokio::test]
async fn refused_renewal_keeps_the_previous_sequence_active() {
    let (mut controller_stream, mut device_stream) = streams();
    let cancel = CancellationToken::new();
    let keystore = TestKeyStore {
        refuse_renewal: true,
        ..TestKeyStore::default()
    };

    let device_cancel = cancel.clone();
    let device = tokio::spawn(async move {
        renewal::serve_renewal(&mut device_stream, &device_cancel, &keystore, 8).await
    });

    // Drive the controller by hand to inspect the final acknowledgement.
    let nonce = [0x21u8; 32];
    framing::write_message(
        &mut controller_stream,
        &Message::CertRenewalRequest(mash_commissioning::messages::CertRenewalRequest { nonce, zone_ca: None }),
    )
    .await
    .unwrap();

    let csr_reply = framing::read_message(&mut controller_stream).await.unwrap();
    assert_matches!(csr_reply, Message::CertRenewalCsr(reply) => {
        assert_eq!(reply.nonce_hash, Some(compute_nonce_hash(&nonce)));
    });

    framing::write_message(
        &mut controller_stream,
        &Message::CertRenewalInstall(mash_commissioning::messages::CertRenewalInstall {
            new_cert: b"bogus".to_vec(),
            sequence: 9,
        }),
    )
    .await
    .unwrap();

    let ack = framing::read_message(&mut controller_stream).await.unwrap();
    assert_matches!(ack, Message::CertRenewalAck(ack) => {
        assert_eq!(ack.status, RenewalStatus::InvalidCert);
        assert_eq!(ack.active_sequence, 8);
    });

    assert_matches!(
        device.await.unwrap(),
        Err(RenewalError::KeyStore(KeyStoreError::InvalidCertificate(_)))
    );
}
