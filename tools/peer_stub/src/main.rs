use std::f64::consts::TAU;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use sync_proto::{
    decode_ego_snapshot, encode_frame, encode_inbound, frame_text, FrameDecoder, InboundMessage,
    TrafficLightRecord, VehicleRecord,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted stand-in for the traffic simulator peer", long_about = None)]
struct Args {
    /// Address the bridge subscribes to for broadcasts
    #[arg(long, default_value = "127.0.0.1:5556")]
    subscribe_bind: SocketAddr,

    /// Address the bridge sends ego snapshots to
    #[arg(long, default_value = "127.0.0.1:5557")]
    request_bind: SocketAddr,

    /// Number of scripted vehicles
    #[arg(long, default_value_t = 6)]
    vehicles: usize,

    /// Peer step length (seconds)
    #[arg(long, default_value_t = 0.1)]
    step_length: f64,

    /// Seconds after connection before START_RECORDING is sent
    #[arg(long, default_value_t = 5.0)]
    record_after: f64,

    /// Stop after this many seconds per session
    #[arg(long)]
    duration: Option<f64>,

    /// Id the bridge uses for its ego vehicle
    #[arg(long, default_value = "f_0.0")]
    ego_id: String,
}

const LIGHT_PERIOD: Duration = Duration::from_secs(1);
const JUNCTIONS: [&str; 2] = ["J1", "J2"];
const PHASES: [&str; 4] = ["GGrr", "yyrr", "rrGG", "rryy"];
const MODELS: [&str; 6] = [
    "AlmaBlue",
    "AlmaGrey",
    "ElkaGrey",
    "ElkaRed",
    "EloraBlue",
    "EloraWhite",
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let subscribe = TcpListener::bind(args.subscribe_bind)
        .with_context(|| format!("Failed to bind subscribe channel at {}", args.subscribe_bind))?;
    let request = TcpListener::bind(args.request_bind)
        .with_context(|| format!("Failed to bind request channel at {}", args.request_bind))?;
    info!(
        target: "peer_stub",
        subscribe = %args.subscribe_bind,
        request = %args.request_bind,
        "peer.listening"
    );

    loop {
        let (broadcast, bridge_addr) = subscribe
            .accept()
            .context("Failed to accept subscribe connection")?;
        let (replies, _) = request
            .accept()
            .context("Failed to accept request connection")?;
        info!(target: "peer_stub", bridge = %bridge_addr, "peer.session_started");

        match run_session(&args, broadcast, replies) {
            Ok(steps) => {
                info!(target: "peer_stub", steps, "peer.session_finished");
                return Ok(());
            }
            Err(err) => warn!(target: "peer_stub", error = %err, "peer.session_lost"),
        }
    }
}

fn run_session(args: &Args, mut broadcast: TcpStream, mut replies: TcpStream) -> Result<u64> {
    broadcast.set_nodelay(true)?;
    replies.set_nonblocking(true)?;
    let mut decoder = FrameDecoder::new(1 << 20);
    let step = Duration::from_secs_f64(args.step_length.max(0.001));

    let started = Instant::now();
    let mut next_step = started;
    let mut next_lights = started;
    let mut recording_sent = false;
    let mut steps = 0u64;
    let mut phase = 0usize;

    loop {
        let elapsed = started.elapsed().as_secs_f64();
        if args.duration.is_some_and(|limit| elapsed >= limit) {
            send(&mut broadcast, &command("STOP_RECORDING"))?;
            return Ok(steps);
        }

        if !recording_sent && elapsed >= args.record_after {
            send(&mut broadcast, &command("START_RECORDING"))?;
            recording_sent = true;
            info!(target: "peer_stub", "peer.recording_requested");
        }

        if Instant::now() >= next_lights {
            let lights = JUNCTIONS
                .iter()
                .enumerate()
                .map(|(index, junction)| TrafficLightRecord {
                    junction_id: junction.to_string(),
                    state: PHASES[(phase + index * 2) % PHASES.len()].to_string(),
                })
                .collect();
            send(&mut broadcast, &InboundMessage::TrafficLights { lights })?;
            phase += 1;
            next_lights += LIGHT_PERIOD;
        }

        let vehicles = scripted_vehicles(args, steps, steps as f64 * args.step_length);
        send(&mut broadcast, &InboundMessage::Vehicles { vehicles })?;
        steps += 1;

        drain_snapshots(&mut replies, &mut decoder, steps)?;

        next_step += step;
        let now = Instant::now();
        if next_step > now {
            thread::sleep(next_step - now);
        }
    }
}

/// Vehicles circle the origin at different radii. The outermost one leaves
/// for a few seconds every cycle so the bridge sees removals.
fn scripted_vehicles(args: &Args, step: u64, time: f64) -> Vec<VehicleRecord> {
    let absent = (step / 50) % 2 == 1;
    let count = if absent {
        args.vehicles.saturating_sub(1)
    } else {
        args.vehicles
    };

    let mut vehicles: Vec<VehicleRecord> = (0..count)
        .map(|index| {
            let radius = 20.0 + 6.0 * index as f64;
            let omega = TAU / (30.0 + 5.0 * index as f64);
            let theta = omega * time + index as f64;
            let (sin, cos) = theta.sin_cos();
            let heading = (-sin).atan2(cos).to_degrees().rem_euclid(360.0);
            VehicleRecord {
                vehicle_id: format!("veh{index}"),
                position: [radius * cos, radius * sin, 0.0],
                angle: (heading * 100.0).round() / 100.0,
                type_tag: MODELS[index % MODELS.len()].to_string(),
                long_speed: (radius * omega) as f32,
                vert_speed: 0.0,
                lat_speed: 0.0,
            }
        })
        .collect();

    // The peer reports the ego row too; the bridge must leave it alone.
    vehicles.push(VehicleRecord {
        vehicle_id: args.ego_id.clone(),
        position: [0.0, 0.0, 0.0],
        angle: 0.0,
        type_tag: "ego".to_string(),
        long_speed: 0.0,
        vert_speed: 0.0,
        lat_speed: 0.0,
    });
    vehicles
}

fn command(token: &str) -> InboundMessage {
    InboundMessage::Command {
        command: token.to_string(),
    }
}

fn send(stream: &mut TcpStream, message: &InboundMessage) -> Result<()> {
    let payload = encode_inbound(message).context("Failed to encode broadcast")?;
    stream
        .write_all(&encode_frame(payload.as_bytes()))
        .context("Failed to write broadcast frame")
}

fn drain_snapshots(stream: &mut TcpStream, decoder: &mut FrameDecoder, step: u64) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => anyhow::bail!("bridge closed the request channel"),
            Ok(read) => decoder.extend(&chunk[..read]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("Failed to read ego snapshot"),
        }
    }

    while let Some(frame) = decoder.next_frame()? {
        let text = frame_text(frame)?;
        match decode_ego_snapshot(&text) {
            Ok(Some(ego)) if step % 10 == 0 => info!(
                target: "peer_stub",
                step,
                x = ego.position[0],
                y = ego.position[1],
                angle = ego.angle,
                speed = ego.long_speed,
                "peer.ego_snapshot"
            ),
            Ok(_) => {}
            Err(err) => warn!(target: "peer_stub", error = %err, "peer.snapshot_invalid"),
        }
    }
    Ok(())
}
