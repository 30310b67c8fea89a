use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hotswap_bytecode::{
    access, BytecodeWriter, ClassFile, CodeEditor, FieldInfo, MethodInfo, Opcode,
};

fn class_with_methods(count: usize) -> ClassFile {
    let mut class = ClassFile::new("com.example.Generated");
    for i in 0..count {
        let name = format!("field{}", i);
        class.fields.push(FieldInfo::new(access::PRIVATE, name.clone(), "J"));
        let field = class.constants.intern_member("com.example.Generated", &name, "J");

        let mut writer = BytecodeWriter::new();
        writer.emit_load_local(0);
        writer.emit_get_field(field);
        writer.emit_return();
        class.methods.push(MethodInfo::new(
            access::PUBLIC,
            format!("get{}", i),
            "()J",
            1,
            writer.into_bytes(),
        ));
    }
    class
}

fn bench_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("class_encoding");

    for count in [8usize, 64, 512] {
        let class = class_with_methods(count);
        let bytes = class.encode();

        group.bench_with_input(BenchmarkId::new("encode", count), &class, |b, class| {
            b.iter(|| black_box(class).encode());
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &bytes, |b, bytes| {
            b.iter(|| ClassFile::decode(black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

fn bench_code_editor(c: &mut Criterion) {
    let class = class_with_methods(1);
    let code = class.methods[0].code.clone();

    c.bench_function("rewrite_field_access", |b| {
        b.iter(|| {
            let mut editor = CodeEditor::decode(black_box(&code)).unwrap();
            editor.rewrite(|_, insn| {
                (insn.opcode == Opcode::GetField).then(|| vec![*insn, *insn])
            });
            editor.encode().unwrap()
        });
    });
}

criterion_group!(benches, bench_encode_decode, bench_code_editor);
criterion_main!(benches);
