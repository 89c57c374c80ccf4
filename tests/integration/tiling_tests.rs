//! Tile grid tests across image sizes, magnifications and stack layouts.

use std::collections::BTreeSet;

use widu::error::TileError;
use widu::stack::{stack_index, Calibration, SourceImage};
use widu::tile::{TileGeometry, TileKey, Tiler, TilingParams, DEFAULT_TILE_SIZE};

use super::test_utils::{gradient, unscaled_stack};

fn geometry(width: u32, height: u32, pixel_width: f64) -> TileGeometry {
    TileGeometry::compute(
        "grid",
        width,
        height,
        1,
        1,
        Calibration::new(pixel_width, "micron"),
        &TilingParams::default(),
    )
    .unwrap()
}

#[test]
fn test_grid_covers_rescaled_image() {
    let cases = [
        (1, 1, 0.405),
        (223, 224, 0.405),
        (224, 225, 0.405),
        (500, 300, 0.405),
        (1000, 700, 0.2025),
        (640, 480, 0.81),
        (333, 77, 0.3),
    ];

    for (width, height, pixel_width) in cases {
        let g = geometry(width, height, pixel_width);
        let label = format!("{}x{} @ {}", width, height, pixel_width);

        assert!(g.padded_width() > g.dest_width, "{}", label);
        assert!(g.padded_height() > g.dest_height, "{}", label);
        assert!(g.padded_width() - g.dest_width <= DEFAULT_TILE_SIZE, "{}", label);
        assert!(g.padded_height() - g.dest_height <= DEFAULT_TILE_SIZE, "{}", label);
        assert_eq!(g.tiles_x, g.dest_width / DEFAULT_TILE_SIZE + 1, "{}", label);
        assert_eq!(g.tile_origins().count(), g.tiles_per_plane(), "{}", label);
    }
}

#[test]
fn test_exact_multiple_gets_extra_tile() {
    let g = geometry(448, 224, 0.405);
    assert_eq!((g.tiles_x, g.tiles_y), (3, 2));
    assert_eq!(g.padded_width(), 672);
}

#[test]
fn test_destination_size_rounds_up() {
    // 0.3 / 0.405 = 0.7407..., 333 * 0.7407 = 246.66...
    let g = geometry(333, 77, 0.3);
    assert_eq!(g.dest_width, 247);
    assert_eq!(g.dest_height, 58);
}

#[test]
fn test_stack_indices_are_linear() {
    let image = unscaled_stack(100, 100, 3, 2);
    let store = Tiler::default().tile(&image).unwrap();

    let indices: BTreeSet<u32> = store.raw_keys().iter().map(|k| k.stack_index()).collect();
    assert_eq!(indices, (1..=6).collect());

    assert_eq!(stack_index(3, 1, 1), 1);
    assert_eq!(stack_index(3, 3, 1), 3);
    assert_eq!(stack_index(3, 1, 2), 4);
    assert_eq!(stack_index(3, 3, 2), 6);
}

#[test]
fn test_keys_are_unique_and_parse_back() {
    let image = unscaled_stack(700, 460, 2, 1);
    let store = Tiler::default().tile(&image).unwrap();
    let keys = store.raw_keys();

    // 4 x 3 tiles per plane
    assert_eq!(keys.len(), 24);

    let names: BTreeSet<String> = keys.iter().map(|k| k.file_name()).collect();
    assert_eq!(names.len(), keys.len());

    for key in keys.iter().step_by(5) {
        let parsed: TileKey = key.file_name().parse().unwrap();
        assert_eq!(parsed, *key);
    }
}

#[test]
fn test_geometry_matches_store_keys() {
    let image = unscaled_stack(260, 500, 2, 2);
    let store = Tiler::default().tile(&image).unwrap();
    let geometry = store.geometry().unwrap();

    assert_eq!(geometry.keys(), store.raw_keys());
    assert_eq!(geometry.tile_count(), store.raw_len());
}

#[test]
fn test_overflowing_grid_is_rejected() {
    let image = SourceImage::single(
        "wide",
        gradient(10_100, 10, 0),
        Calibration::new(0.405, "micron"),
    )
    .unwrap();

    let err = Tiler::default().tile(&image).unwrap_err();
    assert!(matches!(
        err,
        TileError::KeyOverflow {
            field: "x",
            max: 9999,
            ..
        }
    ));
}

#[test]
fn test_tiles_are_square_pngs() {
    let image = unscaled_stack(300, 100, 1, 1);
    let store = Tiler::default().tile(&image).unwrap();

    for key in store.raw_keys() {
        let data = store.get_raw(&key).unwrap();
        let tile = image::load_from_memory_with_format(&data, image::ImageFormat::Png).unwrap();
        assert_eq!(tile.width(), DEFAULT_TILE_SIZE);
        assert_eq!(tile.height(), DEFAULT_TILE_SIZE);
    }
}
