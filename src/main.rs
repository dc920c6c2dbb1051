use anonpki::config::ConfigFile;
use anonpki::issuer::{self, CertificateIssuer, IssuerClient, LocalIssuer, SerialCertificateIssuer};
use anonpki::session::{self, HolderClient, SessionProtocol};
use anonpki::{CountingBloomFilter, CrtOperations, PrimePool, SubjectName, VrfEngine, VrfPublicKey};
use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "anonpki")]
#[command(about = "Anonymous multi-issuer certificates with VRF authentication")]
struct Cli {
    /// YAML configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Anonymous issuance by local issuers, then VRF authentication of the holder
    Demo(DemoArgs),
    /// Build a prime pool and draw distinct moduli from it
    Pool(PoolArgs),
    /// Fill a revocation filter with sequential serials and print its statistics
    Bloom(BloomArgs),
}

#[derive(Args)]
struct DemoArgs {
    /// Common name of the subject requesting the certificate
    #[arg(long, default_value = "Test Subject")]
    common_name: String,

    /// Session id for the VRF exchange
    #[arg(long, default_value = "s1")]
    session_id: String,
}

#[derive(Args)]
struct PoolArgs {
    /// Number of moduli to draw
    #[arg(short, default_value_t = 3)]
    k: usize,

    /// Remainders for the drawn moduli are generated and X is reconstructed
    #[arg(long)]
    solve: bool,
}

#[derive(Args)]
struct BloomArgs {
    /// Serials `{:017}` of 0..elements are inserted
    #[arg(long, default_value_t = 10_000)]
    elements: usize,

    /// Serials to query after insertion
    #[arg(long = "query")]
    queries: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    anonpki::tracing::init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?,
        None => ConfigFile::default(),
    };

    match cli.command {
        Command::Demo(args) => run_demo(&config, args).await,
        Command::Pool(args) => run_pool(&config, args),
        Command::Bloom(args) => run_bloom(&config, args),
    }
}

async fn run_demo(config: &ConfigFile, args: DemoArgs) -> anyhow::Result<()> {
    let certificates: Arc<dyn CertificateIssuer> = Arc::new(SerialCertificateIssuer::default());

    let mut locals = Vec::with_capacity(config.issuers.len());
    for name in &config.issuers {
        let issuer = LocalIssuer::with_generated_pool(
            name.clone(),
            config.prime_pool.count,
            config.prime_pool.bits,
            certificates.clone(),
        )
        .with_context(|| format!("failed to build prime pool for {}", name))?;
        locals.push(Arc::new(issuer));
    }
    let issuers: Vec<Arc<dyn IssuerClient>> = locals
        .iter()
        .map(|issuer| issuer.clone() as Arc<dyn IssuerClient>)
        .collect();

    let engine = Arc::new(VrfEngine::new());
    let holder_keys = engine.generate_key_pair()?;

    let subject = SubjectName::new(&args.common_name)
        .with_organization("Test Client")
        .with_organizational_unit("IT")
        .with_country("CN")
        .with_province("Beijing")
        .with_locality("Beijing");
    let subject_id = format!("subject-{}", uuid::Uuid::new_v4());
    locals[config.designated_issuer].register_subject(subject_id.clone(), subject.clone());

    let (request, ack) = issuer::request_anonymous_certificate(
        &issuers,
        config.designated_issuer,
        &subject_id,
        subject,
        holder_keys.public_key(),
    )
    .await
    .context("anonymous issuance failed")?;

    let x_bits = request.crt.x.as_ref().map(|x| x.bits()).unwrap_or_default();
    println!(
        "moduli from {} issuers, X has {} bits",
        request.crt.moduli.len(),
        x_bits
    );
    println!("{}", serde_json::to_string_pretty(&ack)?);

    let revocations = CountingBloomFilter::new(
        config.bloom.expected_elements,
        config.bloom.false_positive_rate,
        config.bloom.bits_per_count,
    )?;
    if revocations.query_element(ack.certificate.serial.as_bytes()) {
        bail!("certificate {} is listed as revoked", ack.certificate.serial);
    }

    // the transport hands the verifier the key from the peer certificate
    let peer_key = VrfPublicKey::from_sec1_bytes(&ack.certificate.public_key.to_sec1_bytes()?)?;

    let protocol = SessionProtocol::new(engine.clone(), config.session.ttl());
    let (holder_io, verifier_io) = tokio::io::duplex(64 * 1024);
    let connection = session::spawn_connection(
        protocol.clone(),
        verifier_io,
        peer_key,
        config.session.io_timeout(),
    );

    let mut holder = HolderClient::new(holder_io, engine, holder_keys, config.session.io_timeout());
    holder.ping().await?;
    let verified = holder.authenticate(&args.session_id).await?;
    holder.quit().await?;
    connection.await?;

    println!(
        "session {}: {}",
        args.session_id,
        if verified { "verified" } else { "rejected" }
    );
    if !verified {
        bail!("VRF authentication failed");
    }
    Ok(())
}

fn run_pool(config: &ConfigFile, args: PoolArgs) -> anyhow::Result<()> {
    let mut pool = PrimePool::new();
    pool.generate_primes(config.prime_pool.count, config.prime_pool.bits)?;
    let moduli = pool.random_moduli(args.k)?;

    if args.solve {
        let mut ops = CrtOperations::new(moduli);
        ops.generate_random_remainders()?;
        ops.solve()?;
        ops.validate()?;
        println!("{}", serde_json::to_string_pretty(&ops.to_record())?);
    } else {
        for (i, modulus) in moduli.iter().enumerate() {
            println!("n{} = {}", i + 1, modulus);
        }
    }
    Ok(())
}

fn run_bloom(config: &ConfigFile, args: BloomArgs) -> anyhow::Result<()> {
    let filter = CountingBloomFilter::new(
        config.bloom.expected_elements,
        config.bloom.false_positive_rate,
        config.bloom.bits_per_count,
    )?;
    for i in 0..args.elements {
        filter.add_element(format!("{:017}", i).as_bytes());
    }
    for serial in &args.queries {
        println!("{}: {}", serial, filter.query_element(serial.as_bytes()));
    }
    println!("{}", serde_json::to_string_pretty(&filter.stats())?);
    Ok(())
}
