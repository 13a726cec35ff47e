use std::sync::Arc;

use common::{OrderId, Sku};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{CatalogEvent, InMemoryLedger, LineItem, ReservationConfig, ReservationManager};

async fn stocked_manager(on_hand: i64) -> Arc<ReservationManager> {
    let manager = ReservationManager::new(
        Arc::new(InMemoryLedger::new()),
        ReservationConfig::default(),
    );
    manager
        .apply_catalog_event(CatalogEvent::SkuRegistered {
            sku: Sku::new("BENCH"),
            quantity_on_hand: on_hand,
        })
        .await
        .unwrap();
    Arc::new(manager)
}

fn bench_reserve_uncontended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = rt.block_on(stocked_manager(i64::MAX / 2));

    c.bench_function("inventory/reserve_single_line", |b| {
        b.iter(|| {
            rt.block_on(async {
                manager
                    .reserve(OrderId::new(), vec![LineItem::new("BENCH", 1)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_reserve_contended(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("inventory/reserve_32_concurrent_same_sku", |b| {
        b.iter(|| {
            rt.block_on(async {
                let manager = stocked_manager(16).await;
                let tasks: Vec<_> = (0..32)
                    .map(|_| {
                        let manager = Arc::clone(&manager);
                        tokio::spawn(async move {
                            let _ = manager
                                .reserve(OrderId::new(), vec![LineItem::new("BENCH", 1)])
                                .await;
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
            });
        });
    });
}

fn bench_reserve_confirm_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = rt.block_on(stocked_manager(i64::MAX / 2));

    c.bench_function("inventory/reserve_then_confirm", |b| {
        b.iter(|| {
            rt.block_on(async {
                let reservation = manager
                    .reserve(OrderId::new(), vec![LineItem::new("BENCH", 1)])
                    .await
                    .unwrap();
                manager.confirm(reservation.reservation_id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_uncontended,
    bench_reserve_contended,
    bench_reserve_confirm_cycle
);
criterion_main!(benches);
