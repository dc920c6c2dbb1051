use anonpki::issuer::{
    self, CertificateIssuer, IssuerClient, LocalIssuer, SerialCertificateIssuer,
};
use anonpki::session::{self, HolderClient, SessionProtocol, SessionState};
use anonpki::{CountingBloomFilter, Error, SubjectName, VrfEngine, VrfPublicKey};
use assert_matches::assert_matches;
use std::sync::Arc;
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

fn issuers(bits: u64) -> Vec<Arc<LocalIssuer>> {
    let certificates: Arc<dyn CertificateIssuer> = Arc::new(SerialCertificateIssuer::default());
    ["issuer-one", "issuer-two", "issuer-three"]
        .into_iter()
        .map(|name| {
            Arc::new(LocalIssuer::with_generated_pool(name, 4, bits, certificates.clone()).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn issuance_then_authentication() {
    let locals = issuers(128);
    let clients: Vec<Arc<dyn IssuerClient>> = locals
        .iter()
        .map(|i| i.clone() as Arc<dyn IssuerClient>)
        .collect();

    let engine = Arc::new(VrfEngine::new());
    let holder_keys = engine.generate_key_pair().unwrap();
    let subject = SubjectName::new("Test Subject")
        .with_organization("Test Client")
        .with_country("CN");
    locals[1].register_subject("req-1", subject.clone());

    let (request, ack) = issuer::request_anonymous_certificate(
        &clients,
        1,
        "req-1",
        subject.clone(),
        holder_keys.public_key(),
    )
    .await
    .unwrap();

    // the issued certificate carries no part of the real subject
    let issued = &ack.certificate.subject;
    assert_ne!(issued.common_name, subject.common_name);
    assert_eq!(issued.organization, vec!["Anonymous Organization"]);
    request.crt.validate().unwrap();

    // revocation index says the fresh certificate is live
    let revocations = CountingBloomFilter::new(100, 0.01, 1).unwrap();
    revocations.add_element(b"00000000000000099");
    assert!(!revocations.query_element(ack.certificate.serial.as_bytes()));

    let peer_key =
        VrfPublicKey::from_sec1_bytes(&ack.certificate.public_key.to_sec1_bytes().unwrap()).unwrap();
    let protocol = SessionProtocol::new(engine.clone(), Duration::from_secs(60));
    let (holder_io, verifier_io) = tokio::io::duplex(64 * 1024);
    let connection = session::spawn_connection(protocol.clone(), verifier_io, peer_key, IO_TIMEOUT);

    let mut holder = HolderClient::new(holder_io, engine, holder_keys, IO_TIMEOUT);
    assert!(holder.authenticate("s1").await.unwrap());
    holder.quit().await.unwrap();
    connection.await.unwrap();

    assert_eq!(protocol.sessions().state("s1"), Some(SessionState::Verified));
}

#[tokio::test]
async fn connections_are_independent() {
    let engine = Arc::new(VrfEngine::new());
    let protocol = SessionProtocol::new(engine.clone(), Duration::from_secs(60));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        let protocol = protocol.clone();
        tasks.push(tokio::spawn(async move {
            let keys = engine.generate_key_pair().unwrap();
            let (holder_io, verifier_io) = tokio::io::duplex(64 * 1024);
            let connection =
                session::spawn_connection(protocol, verifier_io, keys.public.clone(), IO_TIMEOUT);

            let mut holder = HolderClient::new(holder_io, engine, keys, IO_TIMEOUT);
            let verified = holder.authenticate(&format!("conn-{}", i)).await.unwrap();
            holder.quit().await.unwrap();
            connection.await.unwrap();
            verified
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(protocol.sessions().len(), 4);
    assert_eq!(protocol.sessions().purge_expired(), 4);
}

#[tokio::test]
async fn session_bound_to_connection_key() {
    let engine = Arc::new(VrfEngine::new());
    let alice = engine.generate_key_pair().unwrap();
    let bob = engine.generate_key_pair().unwrap();
    let protocol = SessionProtocol::new(engine.clone(), Duration::from_secs(60));

    // alice opens the session on her connection
    let (alice_io, verifier_io) = tokio::io::duplex(64 * 1024);
    let alice_conn =
        session::spawn_connection(protocol.clone(), verifier_io, alice.public.clone(), IO_TIMEOUT);
    let mut alice_client = HolderClient::new(alice_io, engine.clone(), alice, IO_TIMEOUT);
    let challenge = alice_client.request_challenge("shared").await.unwrap();

    // bob cannot answer it from his own connection
    let (bob_io, verifier_io) = tokio::io::duplex(64 * 1024);
    let bob_conn =
        session::spawn_connection(protocol.clone(), verifier_io, bob.public.clone(), IO_TIMEOUT);
    let mut bob_client = HolderClient::new(bob_io, engine, bob, IO_TIMEOUT);
    assert_matches!(bob_client.submit_proof(&challenge).await, Err(Error::Remote(_)));
    assert_eq!(protocol.sessions().state("shared"), Some(SessionState::Challenged));

    // alice's own answer is unaffected
    assert!(alice_client.submit_proof(&challenge).await.unwrap());

    alice_client.quit().await.unwrap();
    bob_client.quit().await.unwrap();
    alice_conn.await.unwrap();
    bob_conn.await.unwrap();
    assert_eq!(protocol.sessions().state("shared"), Some(SessionState::Verified));
}
