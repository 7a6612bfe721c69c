// ==========================================
// 工序产出 / 批次拆分合并集成测试
// ==========================================
// 职责: 验证批量拆分配置解析、产出批次与库存、拆分/合并的数量守恒与保留锁约束
// ==========================================


#[cfg(test)]
mod batch_production_test {
    use mes_execution::domain::types::{AuditAction, HoldEntityType, InventoryState, RoutingType};
    use mes_execution::domain::{BatchSizeConfig, Operation};
    use mes_execution::engine::{ErrorKind, ProductionOutput};
    use rust_decimal::Decimal;

    use crate::test_helpers::*;

    fn size_config(
        name: &str,
        operation_type: Option<&str>,
        product_sku: Option<&str>,
        min: i64,
        max: i64,
        preferred: Option<i64>,
        allow_partial: bool,
    ) -> BatchSizeConfig {
        BatchSizeConfig {
            config_id: 0,
            config_name: name.to_string(),
            operation_type: operation_type.map(str::to_string),
            product_sku: product_sku.map(str::to_string),
            equipment_type: None,
            min_batch_size: dec(min),
            max_batch_size: dec(max),
            preferred_batch_size: preferred.map(dec),
            allow_partial_batch: allow_partial,
            priority: 0,
            active: true,
        }
    }

    fn started_mixing_operation(env: &TestEnv) -> Operation {
        let (_, _, ops) = create_running_process(
            env,
            "PRODUCE",
            RoutingType::Sequential,
            &[(1, "MIXING", true), (2, "PACKING", true)],
            1,
        );
        env.state
            .operation_controller
            .start_operation(ops[0].operation_id)
            .unwrap()
    }

    fn output(operation_id: i64, total: i64, sku: Option<&str>) -> ProductionOutput {
        ProductionOutput {
            operation_id,
            material_id: "MAT-DOUGH".to_string(),
            total_quantity: dec(total),
            unit: "KG".to_string(),
            product_sku: sku.map(str::to_string),
            equipment_type: None,
        }
    }

    // ==========================================
    // 批量拆分
    // ==========================================

    #[test]
    fn test_calculate_batch_sizes_uses_most_specific_config() {
        let env = setup_env();
        let repo = &env.state.batch_size_config_repo;
        repo.insert(&size_config("GENERIC", None, None, 10, 100, None, true))
            .unwrap();
        repo.insert(&size_config("MIX-SKU", Some("MIXING"), Some("SKU-9"), 10, 100, Some(80), false))
            .unwrap();

        let svc = &env.state.batch_size_service;
        let generic = svc
            .calculate_batch_sizes(dec(250), "MIXING", None, None)
            .unwrap();
        assert_eq!(generic.batch_sizes, vec![dec(100), dec(100), dec(50)]);
        assert!(generic.has_partial_batch);
        assert_eq!(generic.applied_config_name.as_deref(), Some("GENERIC"));

        let specific = svc
            .calculate_batch_sizes(dec(165), "MIXING", Some("SKU-9"), None)
            .unwrap();
        assert_eq!(specific.batch_sizes, vec![dec(80), dec(85)]);
        assert_eq!(specific.batch_count, 2);
        assert!(!specific.has_partial_batch);
        assert_eq!(specific.applied_config_name.as_deref(), Some("MIX-SKU"));
    }

    #[test]
    fn test_no_config_yields_single_batch() {
        let env = setup_env();
        let result = env
            .state
            .batch_size_service
            .calculate_batch_sizes(dec(1234), "ANY", None, None)
            .unwrap();
        assert_eq!(result.batch_sizes, vec![dec(1234)]);
        assert_eq!(result.applied_config_id, None);
    }

    #[test]
    fn test_invalid_config_rejected_on_insert() {
        let env = setup_env();
        let err = env
            .state
            .batch_size_config_repo
            .insert(&size_config("BROKEN", None, None, 50, 10, None, true))
            .unwrap_err();
        assert!(err.to_string().contains("BROKEN"));
    }

    // ==========================================
    // 工序产出
    // ==========================================

    #[test]
    fn test_produce_output_mints_batches_and_lots() {
        let env = setup_env();
        env.state
            .batch_size_config_repo
            .insert(&size_config("MIX", Some("MIXING"), None, 10, 100, None, true))
            .unwrap();
        let op = started_mixing_operation(&env);

        let result = env
            .state
            .batch_service
            .produce_output(&output(op.operation_id, 250, None))
            .unwrap();

        assert_eq!(result.sizing.batch_count, 3);
        assert_eq!(result.batches.len(), 3);
        let total: Decimal = result.batches.iter().map(|b| b.batch.quantity).sum();
        assert_eq!(total, dec(250));

        for (i, produced) in result.batches.iter().enumerate() {
            assert_eq!(
                produced.batch.batch_number,
                format!("BATCH-MI-{}-{:03}", today_compact(), i + 1)
            );
            assert_eq!(produced.batch.source_operation_id, Some(op.operation_id));
            assert_eq!(produced.lot.batch_id, Some(produced.batch.batch_id));
            assert_eq!(produced.lot.state, InventoryState::Available);
            assert_eq!(produced.lot.quantity, produced.batch.quantity);
        }

        let records = env
            .state
            .audit_log_repo
            .find_by_entity("BATCH", &result.batches[0].batch.batch_id.to_string())
            .unwrap();
        assert_eq!(records[0].action, AuditAction::Produce);
    }

    #[test]
    fn test_produce_output_requires_started_unheld_operation() {
        let env = setup_env();
        let (_, _, ops) = create_running_process(
            &env,
            "NOT-STARTED",
            RoutingType::Sequential,
            &[(1, "MIXING", true)],
            1,
        );
        let batch_service = &env.state.batch_service;

        let err = batch_service
            .produce_output(&output(ops[0].operation_id, 10, None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let started = env
            .state
            .operation_controller
            .start_operation(ops[0].operation_id)
            .unwrap();
        env.state
            .hold_service
            .apply_hold(HoldEntityType::Operation, started.operation_id, "contamination")
            .unwrap();
        let err = batch_service
            .produce_output(&output(started.operation_id, 10, None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        assert_eq!(
            batch_service.produce_output(&output(999, 10, None)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_failed_production_consumes_no_numbers() {
        let env = setup_env();
        let (_, _, ops) = create_running_process(
            &env,
            "ROLLBACK",
            RoutingType::Sequential,
            &[(1, "MIXING", true)],
            1,
        );
        // 工序未开工，事务内校验失败
        assert!(env
            .state
            .batch_service
            .produce_output(&output(ops[0].operation_id, 10, None))
            .is_err());

        let number = env
            .state
            .batch_number_generator
            .generate_batch_number(&mes_execution::engine::NumberingRequest {
                operation_type: Some("MIXING"),
                operation_code: None,
                product_sku: None,
            })
            .unwrap();
        assert!(number.ends_with("-001"));
    }

    // ==========================================
    // 拆分 / 合并
    // ==========================================

    #[test]
    fn test_split_batch_conserves_quantity() {
        let env = setup_env();
        let parent_id = insert_batch(&env, "PB-100", "MAT-1", dec(100));
        let svc = &env.state.batch_service;

        let children = svc.split_batch(parent_id, &[dec(30), dec(25)]).unwrap();
        let numbers: Vec<&str> = children.iter().map(|c| c.batch_number.as_str()).collect();
        assert_eq!(numbers, vec!["PB-100-S01", "PB-100-S02"]);
        assert!(children.iter().all(|c| c.parent_batch_id == Some(parent_id)));

        let parent = svc.get_batch(parent_id).unwrap();
        assert_eq!(parent.quantity, dec(45));
        assert_eq!(env.state.batch_repo.find_children(parent_id).unwrap().len(), 2);
    }

    #[test]
    fn test_split_batch_rejections() {
        let env = setup_env();
        let parent_id = insert_batch(&env, "PB-200", "MAT-1", dec(10));
        let svc = &env.state.batch_service;

        assert_eq!(
            svc.split_batch(parent_id, &[dec(6), dec(5)]).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            svc.split_batch(parent_id, &[dec(0)]).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(svc.split_batch(parent_id, &[]).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(
            svc.split_batch(404, &[dec(1)]).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        env.state
            .hold_service
            .apply_hold(HoldEntityType::Batch, parent_id, "QC")
            .unwrap();
        let err = svc.split_batch(parent_id, &[dec(1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            err.to_string(),
            format!("Batch {}: cannot be split while on hold", parent_id)
        );
        assert_eq!(svc.get_batch(parent_id).unwrap().quantity, dec(10));
    }

    #[test]
    fn test_merge_batches() {
        let env = setup_env();
        let a = insert_batch(&env, "PB-A", "MAT-1", dec(12));
        let b = insert_batch(&env, "PB-B", "MAT-1", dec(8));
        let svc = &env.state.batch_service;

        let merged = svc.merge_batches(&[a, b]).unwrap();
        assert_eq!(merged.batch_number, format!("MRG-{}-0001", today_compact()));
        assert_eq!(merged.quantity, dec(20));
        assert!(svc.get_batch(a).unwrap().quantity.is_zero());
        assert!(svc.get_batch(b).unwrap().quantity.is_zero());
    }

    #[test]
    fn test_merged_away_lots_cannot_be_consumed() {
        let env = setup_env();
        env.state
            .batch_size_config_repo
            .insert(&size_config("MIX-10", Some("MIXING"), None, 1, 10, None, true))
            .unwrap();
        let op = started_mixing_operation(&env);
        let produced = env
            .state
            .batch_service
            .produce_output(&output(op.operation_id, 15, None))
            .unwrap();
        assert_eq!(produced.batches.len(), 2);
        let source_ids: Vec<i64> = produced.batches.iter().map(|b| b.batch.batch_id).collect();

        let merged = env.state.batch_service.merge_batches(&source_ids).unwrap();
        assert_eq!(merged.quantity, dec(15));

        let inventory = &env.state.inventory_service;
        for source in &produced.batches {
            let lot = inventory.get_lot(source.lot.inventory_id).unwrap();
            assert_eq!(lot.state, InventoryState::Consumed);
            assert!(lot.quantity.is_zero());
            let err = inventory
                .consume(source.lot.inventory_id, dec(1), None)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }

        let merged_lots = env.state.inventory_repo.find_by_batch(merged.batch_id).unwrap();
        assert_eq!(merged_lots.len(), 1);
        assert_eq!(merged_lots[0].state, InventoryState::Available);
        assert_eq!(merged_lots[0].quantity, dec(15));

        // 全部物料只能从合并后的库存消耗一次
        let after = inventory
            .consume(merged_lots[0].inventory_id, dec(15), None)
            .unwrap();
        assert_eq!(after.state, InventoryState::Consumed);

        let audits = env
            .state
            .audit_log_repo
            .find_by_entity("INVENTORY", &produced.batches[0].lot.inventory_id.to_string())
            .unwrap();
        assert!(audits.iter().any(|r| r.action == AuditAction::Consume));
    }

    #[test]
    fn test_split_moves_parent_lot_into_children() {
        let env = setup_env();
        let parent_id = insert_batch(&env, "PB-300", "MAT-1", dec(100));
        let parent_lot = receive_lot(&env, "MAT-1", dec(100), Some(parent_id));

        let children = env
            .state
            .batch_service
            .split_batch(parent_id, &[dec(30), dec(25)])
            .unwrap();

        let inventory = &env.state.inventory_service;
        let remaining = inventory.get_lot(parent_lot.inventory_id).unwrap();
        assert_eq!(remaining.quantity, dec(45));
        assert_eq!(remaining.state, InventoryState::Available);

        for (child, expected) in children.iter().zip([dec(30), dec(25)]) {
            let lots = env.state.inventory_repo.find_by_batch(child.batch_id).unwrap();
            assert_eq!(lots.len(), 1);
            assert_eq!(lots[0].quantity, expected);
            assert_eq!(lots[0].state, InventoryState::Available);
        }

        // 拆空父库存
        let rest = env
            .state
            .batch_service
            .split_batch(parent_id, &[dec(45)])
            .unwrap();
        assert_eq!(rest[0].batch_number, "PB-300-S03");
        let drained = inventory.get_lot(parent_lot.inventory_id).unwrap();
        assert_eq!(drained.state, InventoryState::Consumed);
        assert!(drained.quantity.is_zero());
    }

    #[test]
    fn test_split_and_merge_reject_unmovable_lots() {
        let env = setup_env();
        let svc = &env.state.batch_service;
        let inventory = &env.state.inventory_service;

        // 预留给订单的库存不能随批次迁移
        let reserved_batch = insert_batch(&env, "PB-R", "MAT-1", dec(10));
        let reserved_lot = receive_lot(&env, "MAT-1", dec(10), Some(reserved_batch));
        inventory.reserve(reserved_lot.inventory_id, 77).unwrap();
        let other = insert_batch(&env, "PB-O", "MAT-1", dec(5));
        receive_lot(&env, "MAT-1", dec(5), Some(other));

        let err = svc.merge_batches(&[reserved_batch, other]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            err.to_string(),
            format!(
                "Batch {}: cannot be merged while inventory {} is RESERVED",
                reserved_batch, reserved_lot.inventory_id
            )
        );
        let err = svc.split_batch(reserved_batch, &[dec(1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(svc.get_batch(other).unwrap().quantity, dec(5));

        // 已消耗完的库存
        let spent = insert_batch(&env, "PB-X", "MAT-1", dec(4));
        let spent_lot = receive_lot(&env, "MAT-1", dec(4), Some(spent));
        inventory.consume(spent_lot.inventory_id, dec(4), None).unwrap();
        assert_eq!(
            svc.merge_batches(&[spent, other]).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        // 库存级保留锁
        let held = insert_batch(&env, "PB-H", "MAT-1", dec(6));
        let held_lot = receive_lot(&env, "MAT-1", dec(6), Some(held));
        env.state
            .hold_service
            .apply_hold(HoldEntityType::Inventory, held_lot.inventory_id, "QC")
            .unwrap();
        let err = svc.split_batch(held, &[dec(2)]).unwrap_err();
        assert!(err.to_string().contains("is on hold"));
        assert_eq!(inventory.get_lot(held_lot.inventory_id).unwrap().quantity, dec(6));

        // 库存少于批次记录时按库存量限制
        let short = insert_batch(&env, "PB-S", "MAT-1", dec(100));
        receive_lot(&env, "MAT-1", dec(40), Some(short));
        assert_eq!(
            svc.split_batch(short, &[dec(50)]).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_merge_batches_rejections() {
        let env = setup_env();
        let a = insert_batch(&env, "PB-C", "MAT-1", dec(5));
        let b = insert_batch(&env, "PB-D", "MAT-2", dec(5));
        let c = insert_batch(&env, "PB-E", "MAT-1", dec(5));
        let svc = &env.state.batch_service;

        assert_eq!(svc.merge_batches(&[a]).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(svc.merge_batches(&[a, a]).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(svc.merge_batches(&[a, b]).unwrap_err().kind(), ErrorKind::Validation);

        env.state
            .hold_service
            .apply_hold(HoldEntityType::Batch, c, "QC")
            .unwrap();
        let err = svc.merge_batches(&[a, c]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("cannot be merged while on hold"));
        assert_eq!(svc.get_batch(a).unwrap().quantity, dec(5));
    }
}
