use std::error::Error;
use std::sync::Arc;
use std::{env, fs};

use compositor_core::{
    Engine, Frame, NodeKind, RenderBackend, RenderHandle, RenderJob, RenderOutcome, Resolution,
};

/// Software backend for the demo: generators fill a solid white frame,
/// everything else passes its first input through unchanged.
struct SolidBackend;

impl RenderBackend for SolidBackend {
    fn execute(&self, job: RenderJob, handle: RenderHandle) {
        let frame = match job.inputs.iter().flatten().next() {
            Some(input) => input.clone(),
            None => {
                let r = job.resolution.unwrap_or(Resolution::new(1, 1));
                let len = (r.width * r.height * 4) as usize;
                Frame::new(r.width, r.height, vec![255; len])
            }
        };
        handle.finish(Ok(RenderOutcome::new(frame)));
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let engine = Engine::new(Arc::new(SolidBackend));

    let args: Vec<String> = env::args().collect();
    if let Some(path) = args.get(1) {
        let json_str = fs::read_to_string(path)?;
        let ids = engine.load(&json_str)?;
        println!("Loaded {} node(s) from {path}", ids.len());
    } else {
        let source = engine.create_generator("solid", Resolution::new(1920, 1080));
        let blur = engine.create_node(NodeKind::Single, "blur");
        let out = engine.create_node(NodeKind::Output, "out");
        engine.connect(blur, 0, source)?;
        engine.connect(out, 0, blur)?;
    }

    for id in engine.node_ids() {
        let resolution = engine
            .resolution(id)
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unresolved".to_string());
        println!(
            "node {id}: {resolution}, rendered {} frame(s)",
            engine.render_index(id).unwrap_or(0)
        );
    }

    let json_str = engine.save()?;
    fs::write("./graph.json", &json_str)?;
    println!("Saved graph.json ({} bytes)", json_str.len());

    Ok(())
}
