//! Packet command handlers: open, recv, send, echo

use super::{describe_filter, open_target, stop_on_interrupt, CommandResult, Target};
use anyhow::{bail, Context};
use rawhid_transport::protocol::hex_dump;
use rawhid_transport::{require_transfer, RawHid};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

/// Open up to `max` matching devices and report how many were found
pub fn open(hid: &RawHid, target: &Target, max: usize) -> CommandResult {
    let count = hid.open(max, &target.filter)?;
    if count == 0 {
        println!("No device found matching {}", describe_filter(&target.filter));
    } else {
        println!(
            "Opened {} device(s) matching {}",
            count,
            describe_filter(&target.filter)
        );
    }
    Ok(())
}

/// Print received packets until interrupted or `count` packets arrived
pub fn recv(hid: &RawHid, target: &Target, size: usize, count: Option<usize>) -> CommandResult {
    open_target(hid, target)?;
    let stop = stop_on_interrupt();

    println!(
        "Listening on device {} of {} (Ctrl+C to stop)",
        target.index,
        describe_filter(&target.filter)
    );
    let mut buf = vec![0u8; size];
    let mut received = 0usize;
    while !stop.load(Ordering::SeqCst) && count.map_or(true, |limit| received < limit) {
        let got = hid
            .recv(
                target.vendor_id(),
                target.product_id(),
                target.index,
                &mut buf,
                target.timeout,
            )
            .context("Receive failed")?;
        if let Some(n) = got {
            received += 1;
            println!("recv {:3} bytes: {}", n, hex_dump(&buf[..n]));
        }
    }
    hid.close(target.vendor_id(), target.product_id(), target.index);
    println!("Received {} packet(s)", received);
    Ok(())
}

/// Send one packet built from a hex string
pub fn send(hid: &RawHid, target: &Target, payload: &str, size: Option<usize>) -> CommandResult {
    let mut data = parse_hex(payload)?;
    if let Some(size) = size {
        if data.len() > size {
            bail!("Payload is {} bytes, larger than --size {}", data.len(), size);
        }
        data.resize(size, 0);
    }

    open_target(hid, target)?;
    let sent = require_transfer(hid.send(
        target.vendor_id(),
        target.product_id(),
        target.index,
        &data,
        target.timeout,
    ))
    .with_context(|| format!("Send failed (timeout {:?})", target.timeout))?;
    println!("Sent {} bytes: {}", sent, hex_dump(&data[..sent]));
    Ok(())
}

/// Send `rounds` packets and compare each reply with what was sent
pub fn echo(hid: &RawHid, target: &Target, size: usize, rounds: usize) -> CommandResult {
    open_target(hid, target)?;
    let (vid, pid, index) = (target.vendor_id(), target.product_id(), target.index);

    let mut reply = vec![0u8; size];
    let mut failures = 0usize;
    for round in 0..rounds {
        let packet = test_pattern(size, round);
        let start = Instant::now();
        require_transfer(hid.send(vid, pid, index, &packet, target.timeout))
            .with_context(|| format!("Round {}: send failed", round))?;
        match hid.recv(vid, pid, index, &mut reply, target.timeout)? {
            Some(n) if reply[..n] == packet[..] => {
                debug!("Round {} echoed in {:?}", round, start.elapsed());
            }
            Some(n) => {
                failures += 1;
                warn!("Round {}: reply differs", round);
                println!("round {}: sent     {}", round, hex_dump(&packet));
                println!("round {}: received {}", round, hex_dump(&reply[..n]));
            }
            None => {
                failures += 1;
                println!("round {}: no reply within {:?}", round, target.timeout);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} round(s) failed", failures, rounds);
    }
    println!("All {} round(s) echoed correctly", rounds);
    Ok(())
}

/// Counting byte pattern, shifted per round so stale replies are caught
fn test_pattern(size: usize, round: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_add(round) & 0xFF) as u8).collect()
}

/// Parse hex bytes separated by whitespace, commas or colons
///
/// Each token may carry a `0x` prefix and hold several bytes (`"0102ff"`).
pub fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .filter(|t| !t.is_empty())
    {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || digits.len() % 2 != 0 {
            bail!("Invalid hex token '{}': expected whole bytes", token);
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair).context("Invalid hex")?;
            let byte = u8::from_str_radix(pair, 16)
                .with_context(|| format!("Invalid hex token '{}'", token))?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}
