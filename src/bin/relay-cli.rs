//! Command-line client for a relay node.
//!
//! Exercises the four call patterns and prints every response as JSON.

use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use futures_util::{stream, StreamExt};
use rand::Rng;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Request;
use uuid::Uuid;

use grpc_relay::proto::landing_service_client::LandingServiceClient;
use grpc_relay::proto::{TalkRequest, TalkResponse};
use grpc_relay::rpc::synth::{GREETINGS, META_TAG};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Client for the gRPC relay node", long_about = None)]
struct Cli {
    /// Node address
    #[arg(short, long, default_value = "http://localhost:9996")]
    addr: String,

    /// CA certificate (PEM); enables TLS
    #[arg(long)]
    ca: Option<PathBuf>,

    /// TLS server name
    #[arg(long, default_value = "hello.grpc.io")]
    domain: String,

    /// How many times to run the command
    #[arg(short, long, default_value_t = 1)]
    iterations: u32,

    /// Request data (index, or comma-separated indices for one-answer-more)
    #[arg(short, long)]
    data: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Unary call
    Talk,
    /// One request, one response per index
    OneAnswerMore,
    /// Three requests, one aggregated response
    MoreAnswerOne,
    /// Three requests, one response each
    Bidirectional,
    /// All four patterns in order
    All,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut client = connect(&cli).await?;

    for iteration in 1..=cli.iterations {
        if cli.iterations > 1 {
            eprintln!("# iteration {}/{}", iteration, cli.iterations);
        }
        match cli.command {
            Commands::Talk => talk(&mut client, &cli).await?,
            Commands::OneAnswerMore => one_answer_more(&mut client, &cli).await?,
            Commands::MoreAnswerOne => more_answer_one(&mut client).await?,
            Commands::Bidirectional => bidirectional(&mut client).await?,
            Commands::All => {
                talk(&mut client, &cli).await?;
                one_answer_more(&mut client, &cli).await?;
                more_answer_one(&mut client).await?;
                bidirectional(&mut client).await?;
            }
        }
    }

    Ok(())
}

async fn connect(cli: &Cli) -> Result<LandingServiceClient<Channel>, Box<dyn Error>> {
    let mut endpoint = Endpoint::from_shared(cli.addr.clone())?.connect_timeout(Duration::from_secs(3));
    if let Some(ca) = &cli.ca {
        let pem = tokio::fs::read(ca).await?;
        endpoint = endpoint.tls_config(
            ClientTlsConfig::new()
                .domain_name(cli.domain.clone())
                .ca_certificate(Certificate::from_pem(pem)),
        )?;
    }
    Ok(LandingServiceClient::new(endpoint.connect().await?))
}

/// Wrap a message with a request ID and a fresh B3 trace.
fn traced<T>(message: T) -> Result<Request<T>, Box<dyn Error>> {
    let mut request = Request::new(message);
    let trace_id = Uuid::new_v4().simple().to_string();
    let metadata = request.metadata_mut();
    metadata.insert("x-request-id", Uuid::new_v4().to_string().parse()?);
    metadata.insert("x-b3-traceid", trace_id.parse()?);
    metadata.insert("x-b3-spanid", trace_id[..16].parse()?);
    metadata.insert("x-b3-sampled", "1".parse()?);
    Ok(request)
}

fn talk_request(data: &str) -> TalkRequest {
    TalkRequest {
        data: data.to_string(),
        meta: META_TAG.to_string(),
    }
}

/// Three requests with random indices.
fn random_requests() -> Vec<TalkRequest> {
    let mut rng = rand::thread_rng();
    (0..3)
        .map(|_| talk_request(&rng.gen_range(0..GREETINGS.len()).to_string()))
        .collect()
}

fn print(response: &TalkResponse) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

async fn talk(client: &mut LandingServiceClient<Channel>, cli: &Cli) -> Result<(), Box<dyn Error>> {
    let data = cli.data.as_deref().unwrap_or("0");
    let start = Instant::now();
    let response = client.talk(traced(talk_request(data))?).await?.into_inner();
    print(&response)?;
    eprintln!("# talk: {}ms", start.elapsed().as_millis());
    Ok(())
}

async fn one_answer_more(
    client: &mut LandingServiceClient<Channel>,
    cli: &Cli,
) -> Result<(), Box<dyn Error>> {
    let data = cli.data.as_deref().unwrap_or("0,1,2");
    let start = Instant::now();
    let mut stream = client
        .talk_one_answer_more(traced(talk_request(data))?)
        .await?
        .into_inner();

    let mut count = 0;
    while let Some(response) = stream.message().await? {
        print(&response)?;
        count += 1;
    }
    eprintln!("# one-answer-more: {} responses in {}ms", count, start.elapsed().as_millis());
    Ok(())
}

async fn more_answer_one(client: &mut LandingServiceClient<Channel>) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let requests = random_requests();
    let response = client
        .talk_more_answer_one(traced(stream::iter(requests))?)
        .await?
        .into_inner();
    print(&response)?;
    eprintln!("# more-answer-one: {}ms", start.elapsed().as_millis());
    Ok(())
}

async fn bidirectional(client: &mut LandingServiceClient<Channel>) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let requests = random_requests();
    let mut responses = client
        .talk_bidirectional(traced(stream::iter(requests))?)
        .await?
        .into_inner();

    let mut count = 0;
    while let Some(response) = responses.next().await {
        print(&response?)?;
        count += 1;
    }
    eprintln!("# bidirectional: {} responses in {}ms", count, start.elapsed().as_millis());
    Ok(())
}
