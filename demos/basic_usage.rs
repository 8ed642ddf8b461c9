use hnswann::{HnswBuilder, HnswIndex, Metric};

fn main() {
    tracing_subscriber::fmt::init();

    let colors = [
        ("red", [255.0, 0.0, 0.0]),
        ("green", [0.0, 255.0, 0.0]),
        ("blue", [0.0, 0.0, 255.0]),
    ];

    let mut index = HnswIndex::new(3, Metric::L2);
    for (_, rgb) in &colors {
        index.add_data(rgb.to_vec()).unwrap();
    }
    index.build(HnswBuilder::default()).unwrap();

    let out = index
        .search_by_vector(&[204.0, 85.0, 0.0], 1, None, false)
        .unwrap();
    let closest = out.ids()[0];
    println!("{:?}", colors[closest.index()].0);
}
