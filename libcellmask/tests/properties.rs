use std::collections::{BTreeSet, HashSet};

use cellmask::edit::MergeLog;
use cellmask::geometry::{close_polygon, rasterize_polygon};
use cellmask::*;
use proptest::prelude::*;

const SIZE: usize = 6;

fn label_grid() -> impl Strategy<Value = LabelMatrix> {
    prop::collection::vec(prop::collection::vec(0u32..5, SIZE), SIZE)
        .prop_map(|rows| LabelMatrix::from_rows(&rows).unwrap())
}

fn point() -> impl Strategy<Value = Point> {
    (-2i32..(SIZE as i32 + 2), -2i32..(SIZE as i32 + 2)).prop_map(|(x, y)| Point::new(x, y))
}

proptest! {
    #[test]
    fn double_toggle_is_identity(
        matrix in label_grid(),
        initial in prop::collection::btree_set(1u32..5, 0..4),
        pick in 0usize..16,
    ) {
        let ids: Vec<u32> = matrix.label_set().into_iter().collect();
        prop_assume!(!ids.is_empty());
        let id = ids[pick % ids.len()];
        let exclusions: ExclusionSet = initial.into_iter().filter(|i| ids.contains(i)).collect();

        let engine = EditEngine::new("prop");
        let (once, _) = engine.toggle(&matrix, &exclusions, id).unwrap();
        let (twice, _) = engine.toggle(&matrix, &once, id).unwrap();
        prop_assert_eq!(twice, exclusions);
    }

    #[test]
    fn connect_twice_restores_partition(
        matrix in label_grid(),
        x in 0i32..(SIZE as i32 - 1),
        y in 0i32..(SIZE as i32),
    ) {
        let a = matrix.get(x as u32, y as u32).unwrap();
        let b = matrix.get(x as u32 + 1, y as u32).unwrap();
        prop_assume!(a != 0 && b != 0 && a != b);

        let engine = EditEngine::new("prop");
        let stroke = [Point::new(x, y), Point::new(x + 1, y)];
        let none = ExclusionSet::new();
        let (merged, log, effect) = engine.connect(&matrix, &MergeLog::new(), &stroke, &none);
        prop_assert_eq!(effect, EditEffect::Merged { canonical: a.min(b), absorbed: a.max(b) });

        let (restored, log, _) = engine.connect(&merged, &log, &stroke, &none);
        prop_assert_eq!(restored, matrix);
        prop_assert!(log.is_empty());
    }

    #[test]
    fn finalize_partitions_present_ids(
        matrix in label_grid(),
        toggles in prop::collection::vec(1u32..5, 0..8),
    ) {
        let mut session = SessionState::new();
        let index = session.install("prop", matrix.clone(), IntensityImage::default()).unwrap();
        for region in toggles {
            let _ = session.apply(index, EditCommand::Toggle { region });
        }

        let exclusions = session.image(index).unwrap().state.exclusions().clone();
        let kept: BTreeSet<u32> = session.finalize(index).unwrap().iter().map(|r| r.id).collect();
        let excluded: BTreeSet<u32> = session.excluded(index).unwrap().iter().map(|r| r.id).collect();

        prop_assert!(kept.iter().all(|&id| !exclusions.contains(id)));
        prop_assert!(excluded.iter().all(|&id| exclusions.contains(id)));
        prop_assert_eq!(kept.union(&excluded).copied().collect::<BTreeSet<_>>(), matrix.label_set());
    }

    #[test]
    fn draw_adds_exactly_one_new_id(
        matrix in label_grid(),
        polygon in prop::collection::vec(point(), 3..7),
    ) {
        let closed = close_polygon(&polygon, OPEN_SHAPE_TOLERANCE);
        let expected = rasterize_polygon(&closed.vertices, SIZE, SIZE);
        let engine = EditEngine::new("prop");

        match engine.draw(&matrix, &polygon) {
            Ok((drawn, effect, _)) => {
                let new_id = matrix.max_label() + 1;
                prop_assert_eq!(effect, EditEffect::Drawn { region: new_id, pixels: expected.len() });
                prop_assert_eq!(drawn.pixel_count(new_id), expected.len());
                let added: Vec<u32> = drawn.label_set().difference(&matrix.label_set()).copied().collect();
                prop_assert_eq!(added, vec![new_id]);
            }
            Err(err) => {
                prop_assert!(matches!(err, CellMaskError::EmptyShape(_)));
                prop_assert!(closed.vertices.len() < 3 || expected.is_empty());
            }
        }
    }

    #[test]
    fn erase_only_clears_target_inside(
        matrix in label_grid(),
        polygon in prop::collection::vec(point(), 3..7),
        pick in 0usize..16,
    ) {
        let ids: Vec<u32> = matrix.label_set().into_iter().collect();
        prop_assume!(!ids.is_empty());
        let target = ids[pick % ids.len()];
        let closed = close_polygon(&polygon, OPEN_SHAPE_TOLERANCE);
        let inside: HashSet<Pixel> = rasterize_polygon(&closed.vertices, SIZE, SIZE)
            .into_iter()
            .collect();

        let engine = EditEngine::new("prop");
        if let Ok((erased, _, _)) = engine.erase(&matrix, &polygon, target) {
            for y in 0..SIZE as u32 {
                for x in 0..SIZE as u32 {
                    let before = matrix.get(x, y).unwrap();
                    let after = erased.get(x, y).unwrap();
                    if before == target && inside.contains(&Pixel::new(x, y)) {
                        prop_assert_eq!(after, 0);
                    } else {
                        prop_assert_eq!(after, before);
                    }
                }
            }
        }
    }
}
