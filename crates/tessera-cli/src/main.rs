use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};

use tessera_ir::{DataType, DeviceType, Expr, Function, OpKind};
use tessera_plan::plan_memory;
use tessera_target::{
    register_storage_info, storage_hook_key, DeviceMap, StorageInfoMap, Target, TargetMap,
};

/// tessera graph memory planner demo driver
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Demo graph to plan: chain, diamond, or texture
    #[arg(short, long, default_value = "chain", value_parser = parse_graph)]
    graph: DemoGraph,

    /// Annotate every node with this device id
    #[arg(short, long)]
    device: Option<i32>,

    /// Dump the function IR to stderr before planning
    #[arg(long)]
    emit_ir: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DemoGraph {
    Chain,
    Diamond,
    Texture,
}

fn parse_graph(s: &str) -> Result<DemoGraph, String> {
    match s {
        "chain" => Ok(DemoGraph::Chain),
        "diamond" => Ok(DemoGraph::Diamond),
        "texture" => Ok(DemoGraph::Texture),
        _ => Err(format!(
            "invalid graph '{s}', expected chain, diamond, or texture"
        )),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    let (mut func, targets) = match cli.graph {
        DemoGraph::Chain => (build_chain(), TargetMap::new()),
        DemoGraph::Diamond => (build_diamond(), TargetMap::new()),
        DemoGraph::Texture => {
            let targets = adreno_targets();
            (build_texture_chain(), targets)
        }
    };

    if let Some(device) = cli.device {
        let nodes: Vec<_> = func.expressions.iter().map(|(handle, _)| handle).collect();
        for node in nodes {
            func.annotate_device(node, DeviceType(device));
        }
    }

    if cli.emit_ir {
        eprintln!("{}", tessera_ir::dump_function(&func));
    }

    let plan = plan_memory(&func, &targets)
        .into_diagnostic()
        .wrap_err("memory planning failed")?;
    println!("{plan}");
    Ok(())
}

/// relu -> relu -> relu over one buffer size; the tail reuses the head.
fn build_chain() -> Function {
    let mut f = Function::new("chain");
    let ty = f.tensor_type(&[1, 1024], DataType::F32);
    let x = f.param("x", ty);
    let a = f.call(OpKind::Relu, vec![x], ty);
    let b = f.call(OpKind::Relu, vec![a], ty);
    let c = f.call(OpKind::Relu, vec![b], ty);
    f.body = Some(c);
    f
}

/// Two branches off one input, joined by an add; nothing can share.
fn build_diamond() -> Function {
    let mut f = Function::new("diamond");
    let ty = f.tensor_type(&[1, 1024], DataType::F32);
    let x = f.param("x", ty);
    let a = f.call(OpKind::Relu, vec![x], ty);
    let b = f.call(OpKind::Sigmoid, vec![x], ty);
    let c = f.call(OpKind::Add, vec![a, b], ty);
    f.body = Some(c);
    f
}

/// Convolution chain whose intermediates live in 2d image buffers.
fn build_texture_chain() -> Function {
    let mut f = Function::new("texture_chain");
    let act = f.tensor_type(&[1, 32, 32, 4], DataType::F16);
    let wide = f.tensor_type(&[1, 16, 64, 4], DataType::F16);
    let weight = f.tensor_type(&[16, 8, 3, 3, 4], DataType::F16);
    let x = f.param("x", act);
    let w0 = f.constant(vec![], weight);
    let a = f.call(OpKind::Conv2d, vec![x, w0], act);
    let b = f.call(OpKind::Relu, vec![a], act);
    let c = f.call(OpKind::Conv2d, vec![b, w0], wide);
    f.body = Some(c);
    f
}

/// Places call results in texture memory and weights in texture:weight.
fn adreno_storage_info(
    func: &Function,
    _dev: &DeviceMap,
    _targets: &TargetMap,
) -> StorageInfoMap {
    let mut info = StorageInfoMap::new();
    for (handle, expr) in func.expressions.iter() {
        let scope = match expr {
            Expr::Call { .. } => "texture",
            Expr::Constant { .. } => "texture:weight",
            _ => continue,
        };
        if let Ok(ty) = func.type_of(handle) {
            info.insert(handle, vec![scope.to_string(); ty.tensors().len()]);
        }
    }
    info
}

/// Target map for an Adreno-class GPU, routed to [`adreno_storage_info`].
fn adreno_targets() -> TargetMap {
    let mut targets = TargetMap::new();
    targets.insert(DeviceType(4), Target::with_device("opencl", "adreno"));
    register_storage_info(storage_hook_key(&targets), Arc::new(adreno_storage_info));
    targets
}
