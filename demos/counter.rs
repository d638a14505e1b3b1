//! Cross-process increment demo
//!
//! The parent creates a shared f64 array and hands its handle (never the
//! bytes) to worker processes as a spawn argument. Each worker attaches,
//! increments a disjoint slice of the indices, and exits; the parent
//! joins them and reads the result out of the same memory.
//!
//! Run with `cargo run --example counter`.

use shmarray::{ArrayHandle, ElementLayout, Scalar, ShmContext};
use std::process::Command;

const LEN: usize = 9;

fn main() {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--worker") => worker(args.collect::<Vec<_>>()),
        _ => parent(),
    }
}

fn parent() {
    let ctx = ShmContext::new();
    let mut array = match ctx.create_array(LEN, ElementLayout::record("d").unwrap()) {
        Ok(array) => array,
        Err(e) => {
            eprintln!("[parent] failed to create shared array: {e}");
            std::process::exit(1);
        }
    };

    for i in 0..LEN {
        array
            .set_record(i as isize, &[Scalar::F64(1.1 * i as f64)])
            .unwrap();
    }
    println!("[parent] before: {:?}", values(&array));

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let json = array.to_handle().to_json().unwrap();
    let exe = std::env::current_exe().expect("current_exe");

    let children: Vec<_> = (0..workers)
        .map(|band| {
            Command::new(&exe)
                .args(["--worker", &json, &band.to_string(), &workers.to_string()])
                .spawn()
                .expect("spawn worker")
        })
        .collect();
    for mut child in children {
        let status = child.wait().expect("wait for worker");
        if !status.success() {
            eprintln!("[parent] worker exited with {status}");
        }
    }

    println!("[parent] after:  {:?}", values(&array));
}

fn worker(args: Vec<String>) {
    let [json, band, bands] = &args[..] else {
        eprintln!("[worker] expected: --worker <handle-json> <band> <bands>");
        std::process::exit(2);
    };
    let band: usize = band.parse().expect("band index");
    let bands: usize = bands.parse().expect("band count");

    let ctx = ShmContext::new();
    let handle = ArrayHandle::from_json(json).expect("handle json");
    let mut array = ctx.view(&handle).expect("attach shared array");

    // Disjoint index slices keep concurrent workers off each other's
    // elements; nothing below this API synchronizes for us.
    for i in (band..array.len()).step_by(bands) {
        let current = array.get_record(i as isize).unwrap()[0].as_f64();
        array
            .set_record(i as isize, &[Scalar::F64(current + 1.0)])
            .unwrap();
    }
}

fn values(array: &shmarray::ShmArray<'_>) -> Vec<f64> {
    array
        .iter()
        .map(|element| match element {
            shmarray::Element::Record(fields) => fields[0].as_f64(),
            shmarray::Element::Byte(b) => b as f64,
        })
        .collect()
}
