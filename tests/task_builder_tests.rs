mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use fftsplus::backend::{DevicePtr, StreamId};
use fftsplus::core::context::{ContextKind, ControlFlowContext};
use fftsplus::core::loader::ModelLoader;
use fftsplus::core::op::attrs;
use fftsplus::core::task_def::{
    AdditionalData, AicpuDef, AtEndDef, ComputeDef, CondSwitchDef, ContextDef, ContextPayload, FftsPlusTaskDef,
    MODE_IN_ARGS_FIRST_FIELD,
};
use fftsplus::runtime::aicpu::CUSTOM_AICPU_KERNEL;
use fftsplus::runtime::kernel::{MIX_AIC_PREFIX, MIX_AIV_PREFIX};
use fftsplus::runtime::AddressResolver;
use fftsplus::{
    init_all, AttrValue, DumpProperties, FftsPlusTaskBuilder, LoaderConfig, ModelContext, OpDesc, OpTable, StatusKind,
    TaskState, TensorDesc,
};

fn builder(h: &Harness) -> FftsPlusTaskBuilder {
    FftsPlusTaskBuilder::standard(h.runtime(), StreamId(3))
}

#[test]
fn test_empty_task_inits_and_distributes() {
    let h = Harness::new();
    let model = h.model(vec![OpDesc::new(0, "noop", "NoOp")]);
    let mut b = builder(&h);

    b.init(&task(0, 0, vec![]), &model).unwrap();
    assert_eq!(b.state(), TaskState::Initialized);
    assert_eq!(h.rt.live_allocations(), 0);

    b.distribute().unwrap();
    assert_eq!(b.state(), TaskState::Distributed);
    let launches = h.rt.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].sqe.total_context_num, 0);
    assert_eq!(launches[0].ids.stream_id, 3);
    assert_eq!(b.launch_ids(), launches[0].ids);
}

#[test]
fn test_missing_op_is_param_invalid() {
    let h = Harness::new();
    let model = h.model(vec![]);
    let mut b = builder(&h);

    let err = b.init(&task(9, 4, vec![]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::ParamInvalid);
    assert_eq!(b.state(), TaskState::Released);
    assert_eq!(h.rt.live_allocations(), 0);

    b.release();
    b.release();
    assert_eq!(b.state(), TaskState::Released);
}

#[test]
fn test_release_without_init() {
    let h = Harness::new();
    let mut b = builder(&h);
    b.release();
    assert_eq!(b.state(), TaskState::Released);
    assert!(h.rt.calls().is_empty());

    let model = h.model(vec![OpDesc::new(0, "noop", "NoOp")]);
    let err = b.init(&task(0, 0, vec![]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::InternalError);
    assert!(b.distribute().is_err());
}

#[test]
fn test_successor_out_of_range_fails_and_frees() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    let mut b = builder(&h);

    let def = task(
        0,
        2,
        vec![aic(0, "conv_kernel", vec![0x1000]).with_successors(vec![1]), label(0, vec![2])],
    );
    let err = b.init(&def, &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::Failed);
    assert_eq!(b.state(), TaskState::Released);
    assert!(b.descriptor().contexts.is_empty());
    assert_eq!(h.rt.live_allocations(), 0);
}

#[test]
fn test_cond_switch_branch_out_of_range_fails() {
    let h = Harness::new();
    let model = h.model(vec![OpDesc::new(0, "cond", "If")]);
    let mut b = builder(&h);

    let cond = ContextDef::new(
        0,
        ContextPayload::CondSwitch(CondSwitchDef {
            condition: 1,
            true_successors: vec![1],
            false_successors: vec![4],
            ..Default::default()
        }),
    );
    let err = b.init(&task(0, 0, vec![cond, label(0, vec![])]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::Failed);
}

#[test]
fn test_at_end_out_label_out_of_range_fails() {
    let h = Harness::new();
    let model = h.model(vec![OpDesc::new(0, "loop", "While")]);
    let mut b = builder(&h);

    let at_end = ContextDef::new(
        0,
        ContextPayload::AtEnd(AtEndDef {
            at_start_slots: vec![0],
            out_label_slots: vec![9],
        }),
    );
    let err = b.init(&task(0, 0, vec![at_end]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::Failed);
    assert_eq!(b.state(), TaskState::Released);
}

#[test]
fn test_undersized_args_is_internal_error() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    let mut b = builder(&h);

    let def = task(0, 1, vec![aic(0, "conv_kernel", vec![0x1000, 0x1040])]);
    let err = b.init(&def, &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::InternalError);
    assert!(err.to_string().contains("addr_size of task is less than number of task_addr"));
    assert_eq!(h.rt.memcpy_count(), 0);
    assert_eq!(h.rt.live_allocations(), 0);
}

#[test]
fn test_workspaces_count_toward_args_size() {
    let h = Harness::new();
    let mut op = compute_op(0, "conv");
    op.workspaces = vec![0x2000, 0x2100];
    op.workspace_bytes = vec![256, 256];
    let model = h.model(vec![op]);

    let mut short = builder(&h);
    let err = short
        .init(&task(0, 2, vec![aic(0, "conv_kernel", vec![0x1000])]), &model)
        .unwrap_err();
    assert_eq!(err.kind(), StatusKind::InternalError);

    let mut b = builder(&h);
    b.init(&task(0, 3, vec![aic(0, "conv_kernel", vec![0x1000])]), &model).unwrap();
    let desc = b.descriptor();
    assert_eq!(desc.io_addrs, vec![0x1000, 0x2000, 0x2100]);
    assert!(desc.args_size >= 8 * desc.io_addrs.len());
    let written = h.rt.read_u64s(desc.args_ptr(), 3).unwrap();
    assert_eq!(written, vec![resolved(0x1000), resolved(0x2000), resolved(0x2100)]);
}

#[test]
fn test_absolute_addresses_pass_through() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    let mut b = builder(&h);

    let mut def = task(0, 2, vec![aic(0, "conv_kernel", vec![0x1020, 0x1040])]);
    def.additional_data.push(AdditionalData {
        data_type: MODE_IN_ARGS_FIRST_FIELD,
        context_ids: vec![0],
    });
    b.init(&def, &model).unwrap();

    assert!(b.descriptor().absolute.contains(&0));
    let written = h.rt.read_u64s(b.descriptor().args_ptr(), 2).unwrap();
    assert_eq!(written, vec![0x1020, resolved(0x1040)]);
}

/// Shifts every address it sees, so a second pass over a value is visible.
struct ShiftingResolver {
    calls: AtomicUsize,
}

const SHIFT: u64 = 0x1_0000_0000;

impl AddressResolver for ShiftingResolver {
    fn resolve(&self, logical: u64) -> fftsplus::Result<DevicePtr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(logical + SHIFT)
    }
}

#[test]
fn test_each_address_resolved_once_per_update() {
    let h = Harness::new();
    let resolver = Arc::new(ShiftingResolver { calls: AtomicUsize::new(0) });
    let table: OpTable = vec![compute_op(0, "conv")].into_iter().collect();
    let model = ModelContext::new(h.runtime(), table, resolver.clone(), h.store.clone(), &LoaderConfig::default());
    model.register_kernels().unwrap();
    let model = Arc::new(model);

    let mut def = task(0, 3, vec![aic(0, "conv_kernel", vec![0xa000, 0xb000, 0xc000])]);
    def.additional_data.push(AdditionalData {
        data_type: MODE_IN_ARGS_FIRST_FIELD,
        context_ids: vec![0],
    });
    let mut b = builder(&h);
    b.init(&def, &model).unwrap();

    let expected = vec![0xa000, 0xb000 + SHIFT, 0xc000 + SHIFT];
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.rt.read_u64s(b.descriptor().args_ptr(), 3).unwrap(), expected);

    b.update_args().unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    assert_eq!(h.rt.read_u64s(b.descriptor().args_ptr(), 3).unwrap(), expected);
    assert_eq!(b.descriptor().io_addrs, vec![0xa000, 0xb000, 0xc000]);
}

#[test]
fn test_update_args_after_rebinding() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    let mut b = builder(&h);
    b.init(&task(0, 2, vec![aic(0, "conv_kernel", vec![0x1000, 0x1080])]), &model).unwrap();
    let args = b.descriptor().args_ptr();
    let copies = h.rt.memcpy_count();

    h.addresses.bind_zero_copy(0x1080, 0xdead_0000);
    b.update_args().unwrap();
    b.update_args().unwrap();
    assert_eq!(h.rt.memcpy_count(), copies + 2);
    assert_eq!(h.rt.read_u64s(args, 2).unwrap(), vec![resolved(0x1000), 0xdead_0000]);

    b.distribute().unwrap();
    let launch = h.rt.launches().pop().unwrap();
    assert_eq!(launch.args_bytes.len(), 16);
    assert_eq!(launch.context_types, vec!["aic"]);
}

#[test]
fn test_cache_persistent_inputs_are_advised() {
    let h = Harness::new();
    let mut op = OpDesc::new(0, "embed", "Gather");
    op.inputs = vec![
        TensorDesc { name: "table".into(), size: 4096, logical_addr: 0x3000, cache_persistent: true },
        TensorDesc { name: "ids".into(), size: 64, logical_addr: 0x4000, cache_persistent: false },
    ];
    let model = h.model(vec![op]);

    let mut b = builder(&h);
    b.init(&task(0, 0, vec![]), &model).unwrap();
    assert_eq!(h.rt.advise_count(), 1);
    assert!(h.rt.calls().contains(&fftsplus::backend::simulated::RuntimeCall::AdviseCachePersist {
        addr: resolved(0x3000),
        size: 4096,
    }));

    h.rt.set_fail_advise(true);
    let mut failing = builder(&h);
    let err = failing.init(&task(0, 0, vec![]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::Failed);
}

#[test]
fn test_hardware_failures_surface_as_failed() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);

    h.rt.set_fail_malloc(true);
    let mut b = builder(&h);
    let err = b.init(&task(0, 1, vec![aic(0, "conv_kernel", vec![0x1000])]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::Failed);
    h.rt.set_fail_malloc(false);

    let mut b = builder(&h);
    assert_eq!(b.distribute().unwrap_err().kind(), StatusKind::InternalError);
    b.init(&task(0, 1, vec![aic(0, "conv_kernel", vec![0x1000])]), &model).unwrap();
    h.rt.set_fail_launch(true);
    assert_eq!(b.distribute().unwrap_err().kind(), StatusKind::Failed);
    assert_eq!(b.state(), TaskState::Initialized);
}

#[test]
fn test_dependency_counts_and_header() {
    let h = Harness::new();
    let model = h.model(vec![OpDesc::new(0, "graph", "PartitionedCall")]);
    let mut b = builder(&h);

    let mut def = task(0, 0, vec![label(0, vec![1, 2]), label(0, vec![2]), label(0, vec![])]);
    def.prefetch_ost_num = 4;
    b.init(&def, &model).unwrap();

    let desc = b.descriptor();
    let preds: Vec<u16> = desc.contexts.iter().map(|c| c.pred_cnt).collect();
    assert_eq!(preds, vec![0, 1, 2]);
    assert_eq!(desc.sqe.total_context_num, 3);
    assert_eq!(desc.sqe.ready_context_num, 1);
    assert_eq!(desc.sqe.prefetch_ost_num, 4);
    assert!(matches!(desc.contexts[0].kind, ContextKind::ControlFlow(ControlFlowContext::Label)));
}

#[test]
fn test_mixed_context_needs_two_kernels() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    let mut b = builder(&h);

    let mix = ContextDef::new(
        0,
        ContextPayload::MixAic(ComputeDef {
            kernel_names: vec!["conv_kernel".into()],
            ..Default::default()
        }),
    );
    let err = b.init(&task(0, 0, vec![mix]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::InternalError);
}

#[test]
fn test_dynamic_kernel_dispatch_by_tiling_key() {
    let h = Harness::new();
    let op = OpDesc::new(0, "dyn", "MatMul")
        .with_attr(attrs::ALL_KERNEL, AttrValue::Bool(true))
        .with_kernel("", kernel("dyn_all"));
    let model = h.model(vec![op.clone()]);
    let mut b = builder(&h);

    let ctx = ContextDef::new(
        0,
        ContextPayload::Aiv(ComputeDef {
            task_addrs: vec![0x1000],
            tiling_key: Some(7),
            ..Default::default()
        }),
    );
    b.init(&task(0, 1, vec![ctx]), &model).unwrap();

    let expected = model.kernels.addr_and_pref_cnt_by_tiling_key(&op, 7, "").unwrap();
    match &b.descriptor().contexts[0].kind {
        ContextKind::Compute(c) => assert_eq!(c.kernels, vec![expected]),
        other => panic!("expected compute context, got {other:?}"),
    }
}

#[test]
fn test_mixed_dynamic_kernel_dispatches_cube_and_vector() {
    let h = Harness::new();
    let op = OpDesc::new(0, "mix", "FlashAttention")
        .with_attr(attrs::ALL_KERNEL, AttrValue::Bool(true))
        .with_kernel(MIX_AIC_PREFIX, kernel("mix_cube"))
        .with_kernel(MIX_AIV_PREFIX, kernel("mix_vec"));
    let model = h.model(vec![op.clone()]);
    let mut b = builder(&h);

    let ctx = ContextDef::new(
        0,
        ContextPayload::MixAic(ComputeDef {
            tiling_key: Some(7),
            ..Default::default()
        }),
    );
    b.init(&task(0, 0, vec![ctx]), &model).unwrap();

    let cube = model.kernels.addr_and_pref_cnt_by_tiling_key(&op, 7, MIX_AIC_PREFIX).unwrap();
    let vector = model.kernels.addr_and_pref_cnt_by_tiling_key(&op, 7, MIX_AIV_PREFIX).unwrap();
    assert_ne!(cube, vector);
    match &b.descriptor().contexts[0].kind {
        ContextKind::Compute(c) => assert_eq!(c.kernels, vec![cube, vector]),
        other => panic!("expected compute context, got {other:?}"),
    }
}

#[test]
fn test_mixed_dynamic_kernel_without_vector_binary_fails() {
    let h = Harness::new();
    let op = OpDesc::new(0, "mix", "FlashAttention")
        .with_attr(attrs::ALL_KERNEL, AttrValue::Bool(true))
        .with_kernel(MIX_AIC_PREFIX, kernel("mix_cube"));
    let model = h.model(vec![op]);
    let mut b = builder(&h);

    let ctx = ContextDef::new(
        0,
        ContextPayload::MixAic(ComputeDef {
            tiling_key: Some(7),
            ..Default::default()
        }),
    );
    let err = b.init(&task(0, 0, vec![ctx]), &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::InternalError);
}

#[test]
fn test_post_process_records_each_op_once() {
    let h = Harness::new();
    let fused = compute_op(0, "conv").with_attr(
        attrs::ORIGINAL_OP_NAMES,
        AttrValue::ListStr(vec!["conv_a".into(), "bias_b".into()]),
    );
    let config = LoaderConfig {
        session_graph_id: None,
        dump: DumpProperties {
            enabled: true,
            ..Default::default()
        }
        .with_layer("conv"),
    };
    let model = h.model_with(vec![fused, compute_op(1, "relu")], &config);
    let mut b = builder(&h);

    let def = task(
        0,
        3,
        vec![
            aic(0, "conv_kernel", vec![0x1000]).with_successors(vec![1]),
            aic(0, "conv_kernel", vec![0x1040]).with_successors(vec![2]),
            aic(1, "relu_kernel", vec![0x1080]),
        ],
    );
    b.init(&def, &model).unwrap();
    assert!(b.descriptor().dump);
    b.distribute().unwrap();
    b.post_process(&def).unwrap();

    let dumps = model.recorder.dumps();
    assert_eq!(dumps.len(), 1);
    assert_eq!(dumps[0].op_name, "conv");
    assert_eq!(dumps[0].args_offset, 0);
    assert_eq!(dumps[0].task_id, b.launch_ids().task_id);

    let ops = model.recorder.ops();
    assert_eq!(ops.len(), 2);
    let tasks = model.recorder.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].context_num, 3);
    assert_eq!(tasks[0].fused_op_names, vec!["conv_a".to_string(), "bias_b".to_string()]);
    assert!(h.rt.launches()[0].dump);
    assert!(model.recorder.to_json().unwrap().contains("bias_b"));
}

#[test]
fn test_dump_not_recorded_when_saving_disabled() {
    let h = Harness::new();
    let op = compute_op(0, "conv").with_attr(attrs::DUMP_FLAG, AttrValue::Bool(true));
    let model = h.model(vec![op]);
    let mut b = builder(&h);
    let def = task(0, 1, vec![aic(0, "conv_kernel", vec![0x1000])]);
    b.init(&def, &model).unwrap();
    b.distribute().unwrap();
    b.post_process(&def).unwrap();

    assert!(model.recorder.dumps().is_empty());
    assert_eq!(model.recorder.ops().len(), 1);
}

#[test]
fn test_aicpu_sessions_and_ext_info() {
    let h = Harness::new();
    let custom = OpDesc::new(1, "cust", "CustomOp").with_kernel(CUSTOM_AICPU_KERNEL, kernel("libcust.so"));
    let model = h.model(vec![OpDesc::new(0, "topk", "TopK"), custom]);

    let cpu = |op_index: u32, kernel_id: u64, so_name: &str, payload: fn(AicpuDef) -> ContextPayload| {
        ContextDef::new(
            op_index,
            payload(AicpuDef {
                kernel_id,
                so_name: so_name.to_string(),
                task_addrs: vec![0x1000],
                ext_info: vec![1, 2, 3, 4],
                ..Default::default()
            }),
        )
    };
    let def = task(
        0,
        4,
        vec![
            cpu(0, 11, "", ContextPayload::AicpuKernel),
            cpu(0, 11, "", ContextPayload::AicpuKernel),
            cpu(1, 12, "libcust.so", ContextPayload::CustomAicpu),
            cpu(1, 13, "libcust.so", ContextPayload::CustomAicpu),
        ],
    );
    let mut b = builder(&h);
    b.init(&def, &model).unwrap();

    assert_eq!(model.aicpu.session_count(), 1);
    assert_eq!(model.aicpu.loaded_libraries(), 1);
    assert_eq!(b.descriptor().ext_info.len(), 4);
    // argument buffer plus one block per context
    assert_eq!(h.rt.live_allocations(), 5);

    b.release();
    assert_eq!(h.rt.live_allocations(), 0);
}

#[test]
fn test_drop_releases_buffers() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    {
        let mut b = builder(&h);
        b.init(&task(0, 1, vec![aic(0, "conv_kernel", vec![0x1000])]), &model).unwrap();
        assert_eq!(h.rt.live_allocations(), 1);
    }
    assert_eq!(h.rt.live_allocations(), 0);
}

#[test]
fn test_parallel_init() {
    let h = Harness::new();
    let ops: Vec<OpDesc> = (0..16).map(|i| compute_op(i, &format!("op{i}"))).collect();
    let model = h.model(ops);
    let defs: Vec<FftsPlusTaskDef> = (0..16)
        .map(|i| task(i, 1, vec![aic(i, &format!("op{i}_kernel"), vec![0x1000 + u64::from(i) * 8])]))
        .collect();
    let mut builders: Vec<FftsPlusTaskBuilder> = (0..16).map(|_| builder(&h)).collect();

    init_all(&mut builders, &defs, &model).unwrap();
    assert!(builders.iter().all(|b| b.state() == TaskState::Initialized));
    assert_eq!(h.rt.live_allocations(), 16);
    assert_eq!(h.rt.register_binary_count(), 16);

    let err = init_all(&mut builders[..1], &defs, &model).unwrap_err();
    assert_eq!(err.kind(), StatusKind::InternalError);
}

#[test]
fn test_task_def_from_json() {
    let h = Harness::new();
    let model = h.model(vec![compute_op(0, "conv")]);
    let def = ModelLoader::parse_task_def(
        r#"{
            "op_index": 0,
            "addr_size": 2,
            "contexts": [
                {"op_index": 0, "successors": [1], "kind": "aic", "kernel_names": ["conv_kernel"], "task_addrs": [4096, 4160], "block_dim": 2},
                {"op_index": 0, "kind": "notify_record", "notify_id": 5},
                {"op_index": 0, "kind": "label"}
            ]
        }"#,
    )
    .unwrap();

    let mut b = builder(&h);
    b.init(&def, &model).unwrap();
    b.distribute().unwrap();
    assert_eq!(
        h.rt.launches()[0].context_types,
        vec!["aic", "notify_record", "label"]
    );
    assert_eq!(h.rt.launches()[0].sqe.ready_context_num, 2);
}
