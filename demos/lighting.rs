//! Multi-process terminal lighting demo
//!
//! A raw-RGB framebuffer and a 3×f64 normal map live in shared memory as
//! grids. Every frame the parent resets the framebuffer, re-exec's one
//! worker process per CPU with the grid handles as spawn arguments, and
//! each worker shades a disjoint band of rows from a moving point light,
//! writing straight into the same mapped pixels. The parent then
//! draws ANSI truecolor rows with an FPS readout. Ctrl-C lands in the
//! library's signal hooks, which unlink the segments before exit.
//!
//! Run with `cargo run --release --example lighting`.

use shmarray::{Element, ElementLayout, GridHandle, ShmContext, ShmGrid};
use std::f64::consts::PI;
use std::io::Write;
use std::process::Command;
use std::time::Instant;

/// Set to false to shade in the parent process instead
const USE_MULTI_PROCESSING: bool = true;

const BASE_COLOR: [u8; 3] = [64, 32, 24];

struct Light {
    x: f64,
    y: f64,
    z: f64,
    r: f64,
    g: f64,
    b: f64,
}

struct Camera {
    x: f64,
    y: f64,
    z: f64,
}

fn main() {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--worker") => worker(args.collect()),
        _ => parent(),
    }
}

// Terminal size queries are outside the core's remit; the environment
// plus a sane fallback is enough for a demo.
fn term_size() -> (usize, usize) {
    let cols: usize = std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(80);
    let lines: usize = std::env::var("LINES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);
    (cols / 2, lines.saturating_sub(4))
}

fn parent() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (width, height) = term_size();
    let ctx = ShmContext::new();

    let mut frame = ctx
        .create_grid(width, height, ElementLayout::record("3B").unwrap())
        .expect("create framebuffer");
    let mut normals = ctx
        .create_grid(width, height, ElementLayout::record("ddd").unwrap())
        .expect("create normal map");
    default_normals(&mut normals);

    let frame_json = frame.to_handle().to_json().unwrap();
    let normal_json = normals.to_handle().to_json().unwrap();
    let exe = std::env::current_exe().expect("current_exe");
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    print!("\x1b[?25l");
    let mut t: i64 = 0;
    let mut start = Instant::now();
    loop {
        reset_frame(&mut frame);

        let light_x = (t % (2 * width as i64) - width as i64).abs() as f64;
        let light_y =
            ((t as f64 / (width as f64 / 3.0)) % (2.0 * height as f64) - height as f64).abs();

        if USE_MULTI_PROCESSING {
            let children: Vec<_> = (0..workers)
                .map(|band| {
                    Command::new(&exe)
                        .args([
                            "--worker",
                            &frame_json,
                            &normal_json,
                            &light_x.to_string(),
                            &light_y.to_string(),
                            &band.to_string(),
                            &workers.to_string(),
                        ])
                        .spawn()
                        .expect("spawn worker")
                })
                .collect();
            for mut child in children {
                let _ = child.wait();
            }
        } else {
            let light = Light {
                x: light_x,
                y: light_y,
                z: 5.0,
                r: 1.0,
                g: 1.0,
                b: 1.0,
            };
            let camera = Camera {
                x: (width / 2) as f64,
                y: (height / 2) as f64,
                z: 0.0,
            };
            shade_band(&mut frame, &normals, &light, &camera, 0, 1);
        }

        display(&frame);
        let fps = 1.0 / start.elapsed().as_secs_f64();
        println!("x={light_x:<6.1} y={light_y:<6.1} width={width:<4} height={height:<4} FPS:{fps:.3}");
        start = Instant::now();
        print!("{}", "\x1b[F".repeat(height + 2));
        t += 1;
    }
}

fn worker(args: Vec<String>) {
    let [frame_json, normal_json, x, y, band, bands] = &args[..] else {
        eprintln!("[worker] expected: --worker <frame-json> <normal-json> <x> <y> <band> <bands>");
        std::process::exit(2);
    };

    let ctx = ShmContext::new();
    let frame_handle = GridHandle::from_json(frame_json).expect("framebuffer handle");
    let normal_handle = GridHandle::from_json(normal_json).expect("normal map handle");
    let mut frame = ctx.grid(&frame_handle).expect("attach framebuffer");
    let normals = ctx.grid(&normal_handle).expect("attach normal map");

    let light = Light {
        x: x.parse().expect("light x"),
        y: y.parse().expect("light y"),
        z: 5.0,
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
    let camera = Camera {
        x: frame.width() as f64 / 2.0,
        y: frame.height() as f64 / 2.0,
        z: 0.0,
    };
    shade_band(
        &mut frame,
        &normals,
        &light,
        &camera,
        band.parse().expect("band index"),
        bands.parse().expect("band count"),
    );
}

/// Diffuse + specular shading of rows `[height*band/bands, height*(band+1)/bands)`.
///
/// Bands are disjoint, so concurrent workers never touch the same pixel.
fn shade_band(
    frame: &mut ShmGrid<'_>,
    normals: &ShmGrid<'_>,
    light: &Light,
    camera: &Camera,
    band: usize,
    bands: usize,
) {
    let (width, height) = (frame.width(), frame.height());
    let (k_d, k_s, shininess) = (1.0, 0.2, 1.0_f64);
    let z = 10.0;

    let row_start = height * band / bands;
    let row_end = height * (band + 1) / bands;

    let pixels = frame.view_mut().as_bytes_mut();
    for y in row_start..row_end {
        for x in 0..width {
            let Ok(Element::Record(n)) = normals.get(x, y) else {
                unreachable!("normal map is a record grid");
            };
            let (nx, ny, nz) = (n[0].as_f64(), n[1].as_f64(), n[2].as_f64());

            let dx = light.x - x as f64;
            let dy = light.y - y as f64;
            let dz = light.z - z;
            // Fragment-to-camera distance is disregarded
            let dist_sqr = dx * dx + dy * dy + dz * dz;
            let distance = dist_sqr.sqrt();
            let dist_coef = 1.0 / (1.0 + 0.1 * distance + 0.01 * dist_sqr);

            let inv_distance = 1.0 / distance;
            let (ix, iy, iz) = (dx * inv_distance, dy * inv_distance, dz * inv_distance);

            let normal_coef = 2.0 * (nx * ix + ny * iy + nz * iz);
            let (rx, ry, rz) = (
                nx * normal_coef - ix,
                ny * normal_coef - iy,
                nz * normal_coef - iz,
            );
            let specular = ((camera.x - x as f64) * rx
                + (camera.y - y as f64) * ry
                + (camera.z - z) * rz)
                .max(0.0);
            let intensity =
                (k_d * (nx * ix + ny * iy + nz * iz) + k_s * specular.powf(shininess)) * dist_coef;

            let mut illuminance = [0.0f64; 3];
            if intensity > 0.0 {
                illuminance[0] = intensity * light.r;
                illuminance[1] = intensity * light.g;
                illuminance[2] = intensity * light.b;
            }

            let addr = (y * width + x) * 3;
            for c in 0..3 {
                let scaled = ((illuminance[c] + 0.5) * pixels[addr + c] as f64).round();
                pixels[addr + c] = if scaled < 255.0 { scaled as u8 } else { 255 };
            }
        }
    }
}

fn default_normals(normals: &mut ShmGrid<'_>) {
    let (width, height) = (normals.width(), normals.height());
    for y in 0..height {
        let y_ = PI / 2.0 + (((y % 30) as f64 * 2.0 - 30.0).abs() - 15.0) * 0.1;
        for x in 0..width {
            let x_ = x as f64 * PI / 20.0;
            let normal = [x_.cos() * y_.cos(), x_.sin() * y_.cos(), -y_.sin().abs()];
            normals
                .set(
                    x,
                    y,
                    &Element::Record(vec![
                        normal[0].into(),
                        normal[1].into(),
                        normal[2].into(),
                    ]),
                )
                .unwrap();
        }
    }
}

fn reset_frame(frame: &mut ShmGrid<'_>) {
    for pixel in frame.view_mut().as_bytes_mut().chunks_exact_mut(3) {
        pixel.copy_from_slice(&BASE_COLOR);
    }
}

fn display(frame: &ShmGrid<'_>) {
    let bytes = frame.view().as_bytes();
    let row_len = frame.width() * 3;
    let mut out = String::with_capacity(bytes.len() * 8);
    for row in bytes.chunks_exact(row_len) {
        for pixel in row.chunks_exact(3) {
            out.push_str(&format!(
                "\x1b[48;2;{};{};{}m  ",
                pixel[0], pixel[1], pixel[2]
            ));
        }
        out.push_str("\x1b[0m\n");
    }
    print!("{out}");
    let _ = std::io::stdout().flush();
}
